use std::{
  any::{Any, TypeId},
  mem,
  sync::{Mutex, OnceLock},
};

use rustc_hash::FxHashMap;

#[cfg(feature = "debug")]
use log::trace;

use crate::ComponentId;

pub trait Component: Any {
  fn id(&self) -> ComponentId;
  fn sid() -> ComponentId
  where
    Self: Sized;
}

/// Per type metadata needed to manage a value inside type erased storage.
#[derive(Clone, Copy, Debug)]
pub struct ComponentInfo {
  pub id: ComponentId,
  pub size: usize,
  pub align: usize,
  pub drop: Option<unsafe fn(*mut u8)>,
}

#[derive(Default)]
struct TypeRegistry {
  ids: FxHashMap<TypeId, ComponentId>,
  infos: Vec<ComponentInfo>,
}

fn registry() -> &'static Mutex<TypeRegistry> {
  static REGISTRY: OnceLock<Mutex<TypeRegistry>> = OnceLock::new();
  REGISTRY.get_or_init(Mutex::default)
}

unsafe fn drop_value<T>(ptr: *mut u8) {
  std::ptr::drop_in_place(ptr.cast::<T>())
}

/// Returns the dense id for `T`, registering it on first use. Ids are stable
/// for the lifetime of the process and count up from zero.
pub fn component_id_of<T: Any>() -> ComponentId {
  let mut registry = registry().lock().unwrap();
  if let Some(id) = registry.ids.get(&TypeId::of::<T>()) {
    return *id;
  }

  let id = registry.infos.len() as ComponentId;

  #[cfg(feature = "debug")]
  trace!(
    "Registering Component {} as {}",
    std::any::type_name::<T>(),
    id
  );

  registry.infos.push(ComponentInfo {
    id,
    size: mem::size_of::<T>(),
    align: mem::align_of::<T>(),
    drop: mem::needs_drop::<T>().then_some(drop_value::<T> as unsafe fn(*mut u8)),
  });
  registry.ids.insert(TypeId::of::<T>(), id);
  id
}

/// Number of distinct component types ever registered.
pub fn component_count() -> usize {
  registry().lock().unwrap().infos.len()
}

/// Metadata for a registered component type.
///
/// Panics if `comp` was never handed out by [`component_id_of`].
pub fn component_info(comp: ComponentId) -> ComponentInfo {
  registry().lock().unwrap().infos[comp as usize]
}

#[cfg(test)]
mod test {
  use crate as strata_ecs;
  use strata_ecs_macros::Component;

  use super::{component_count, component_id_of, component_info, Component};

  #[derive(Component)]
  struct A {
    _x: u32,
  }

  #[derive(Component)]
  struct B {}

  #[test]
  fn stable_ids() {
    let a = A { _x: 0 };
    let b = B {};

    assert_eq!(A::sid(), a.id());
    assert_eq!(B::sid(), b.id());
    assert_eq!(A::sid(), A::sid());
    assert_ne!(A::sid(), B::sid());
  }

  #[test]
  fn info_matches_type() {
    let info = component_info(A::sid());
    assert_eq!(info.id, A::sid());
    assert_eq!(info.size, std::mem::size_of::<A>());
    assert_eq!(info.align, std::mem::align_of::<A>());
    assert!(info.drop.is_none());
  }

  #[test]
  fn drop_fn_registered() {
    struct Dropper(#[allow(unused)] String);

    let id = component_id_of::<Dropper>();
    assert!(component_info(id).drop.is_some());
  }

  #[test]
  fn count_grows() {
    struct Fresh;

    let before = component_count();
    let id = component_id_of::<Fresh>();
    assert!(component_count() >= before + 1);
    // re-registering must not allocate a new id
    assert_eq!(component_id_of::<Fresh>(), id);
  }
}
