pub mod archetype;
pub(crate) mod column;
pub mod components;
pub mod entity;
pub mod signature;
pub mod storage;

pub use strata_ecs_macros::Component;

pub type Id = u64;
pub type ComponentId = Id;
pub type EntityId = Id;
pub type ArchetypeId = Id;
