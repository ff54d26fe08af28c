use std::sync::Mutex;

use rustc_hash::FxHashMap;

use log::debug;

#[cfg(feature = "debug")]
use log::trace;

use crate::{
  archetype::Archetype,
  components::{self, Component},
  entity::IntoEntity,
  signature::Signature,
  ArchetypeId, ComponentId, EntityId,
};

/// A concrete slot: archetype plus row. Committed locations index the
/// committed buffers, pending locations index the staging buffers.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
struct Location {
  archetype: ArchetypeId,
  row: usize,
}

/// Where an entity lives. A live entity always has a committed location, a
/// pending one, or both while a structural change is staged; a destroyed or
/// never created entity has neither.
#[derive(Default, Clone, Copy, Debug)]
struct EntityRecord {
  committed: Option<Location>,
  pending: Option<Location>,
}

/// Free list of recycled entity ids plus the bump counter behind it. Lives
/// behind a lock so ids can be reserved from multiple threads between
/// commits.
#[derive(Default)]
struct EntityIds {
  free: Vec<EntityId>,
  top: EntityId,
}

impl EntityIds {
  fn next(&mut self) -> EntityId {
    if let Some(id) = self.free.pop() {
      id
    } else {
      let id = self.top;
      self.top += 1;
      id
    }
  }
}

/// Owns every archetype, the entity record table, the graveyard of reusable
/// entity ids and the commit machinery. Structural changes are queued and
/// only become visible to iteration after [`commit`].
///
/// [`commit`]: Storage::commit
pub struct Storage {
  archetypes: Vec<Archetype>,
  archetype_index: FxHashMap<Vec<ComponentId>, ArchetypeId>,
  records: Vec<EntityRecord>,
  entity_ids: Mutex<EntityIds>,
  known_types: usize,
}

const ROOT: ArchetypeId = 0;

impl Default for Storage {
  fn default() -> Self {
    let mut storage = Self {
      archetypes: Vec::new(),
      archetype_index: FxHashMap::default(),
      records: Vec::new(),
      entity_ids: Mutex::default(),
      known_types: components::component_count(),
    };
    // the empty archetype every component add chain starts from
    storage.create_archetype(Vec::new());
    storage
  }
}

impl Storage {
  pub fn new() -> Self {
    debug!("Creating Storage");
    Storage::default()
  }

  /// Queues a new entity built from the given component values. The id is
  /// handed out immediately but the entity only becomes visible to queries
  /// after the next [`commit`](Storage::commit).
  pub fn create_entity(&mut self, entity: impl IntoEntity) -> EntityId {
    let id = self.entity_ids.get_mut().unwrap().next();
    self.create_entity_with_id(entity, id);
    id
  }

  /// Like [`create_entity`](Storage::create_entity) but for an id obtained
  /// through [`reserve_entity_id`](Storage::reserve_entity_id).
  pub fn create_entity_with_id(&mut self, entity: impl IntoEntity, id: EntityId) {
    #[cfg(feature = "debug")]
    trace!("Creating Entity {}", id);

    let mut comps = entity.into_entity();
    comps.sort_unstable_by_key(|c| c.id());
    let ids = comps.iter().map(|c| c.id()).collect::<Vec<_>>();
    debug_assert!(ids.windows(2).all(|w| w[0] != w[1]));

    let target = self.archetype_for(&ids);
    let archetype = &mut self.archetypes[target as usize];
    let row = archetype.stage_entity(id);
    for comp in comps {
      let comp_id = comp.id();
      archetype.column_mut(comp_id).unwrap().staging.push_boxed(comp);
    }

    let record = self.record_mut(id);
    debug_assert!(
      record.committed.is_none() && record.pending.is_none(),
      "entity id {} is still alive",
      id
    );
    record.pending = Some(Location {
      archetype: target,
      row,
    });
  }

  /// Hands out an entity id without creating the entity. Safe to call from
  /// multiple threads between commits.
  pub fn reserve_entity_id(&self) -> EntityId {
    #[cfg(feature = "debug")]
    trace!("Reserving EntityId");

    self.entity_ids.lock().unwrap().next()
  }

  /// Queues adding component values to an entity. Values for types the
  /// entity already has are discarded.
  pub fn add_comps(&mut self, entity: EntityId, comps: impl IntoEntity) {
    #[cfg(feature = "debug")]
    trace!("Adding Components to Entity {}", entity);

    self.queue_transition(entity, comps.into_entity(), &[]);
  }

  /// Queues removing component types from an entity. Types the entity does
  /// not have are ignored.
  pub fn remove_comps(&mut self, entity: EntityId, comps: &[ComponentId]) {
    #[cfg(feature = "debug")]
    trace!("Removing Components {:?} from Entity {}", comps, entity);

    self.queue_transition(entity, Vec::new(), comps);
  }

  /// Queues destruction of an entity. Its id only returns to the free list
  /// at commit time, so a stale handle never aliases a reused id within the
  /// same phase.
  pub fn destroy_entity(&mut self, entity: EntityId) {
    #[cfg(feature = "debug")]
    trace!("Destroying Entity {}", entity);

    let record = self.records[entity as usize];
    let owner = record
      .pending
      .or(record.committed)
      .expect("destroy queued for a dead entity");
    self.archetypes[owner.archetype as usize].queue_destroy(entity);
  }

  /// Resolves a committed component reference, falling back to the staged
  /// value while the entity (or the component) is not committed yet. The
  /// reference must not be held across a commit.
  pub fn get_comp<C: Component + 'static>(&self, entity: EntityId) -> Option<&C> {
    let record = *self.records.get(entity as usize)?;
    let comp = C::sid();

    if let Some(loc) = record.committed {
      let archetype = &self.archetypes[loc.archetype as usize];
      if archetype.has(comp) {
        return Some(unsafe { archetype.column(comp)?.committed.get::<C>(loc.row) });
      }
    }
    if let Some(loc) = record.pending {
      let archetype = &self.archetypes[loc.archetype as usize];
      if archetype.has(comp) {
        return Some(unsafe { archetype.column(comp)?.staging.get::<C>(loc.row) });
      }
    }
    None
  }

  pub fn get_comp_mut<C: Component + 'static>(&mut self, entity: EntityId) -> Option<&mut C> {
    let record = *self.records.get(entity as usize)?;
    let comp = C::sid();

    if let Some(loc) = record.committed {
      if self.archetypes[loc.archetype as usize].has(comp) {
        let pair = self.archetypes[loc.archetype as usize].column_mut(comp)?;
        return Some(unsafe { pair.committed.get_mut::<C>(loc.row) });
      }
    }
    if let Some(loc) = record.pending {
      if self.archetypes[loc.archetype as usize].has(comp) {
        let pair = self.archetypes[loc.archetype as usize].column_mut(comp)?;
        return Some(unsafe { pair.staging.get_mut::<C>(loc.row) });
      }
    }
    None
  }

  pub fn has_comp(&self, entity: EntityId, comp: ComponentId) -> bool {
    let Some(record) = self.records.get(entity as usize) else {
      return false;
    };
    [record.committed, record.pending]
      .into_iter()
      .flatten()
      .any(|loc| self.archetypes[loc.archetype as usize].has(comp))
  }

  /// The archetype an entity currently resolves to, preferring the committed
  /// location.
  pub fn archetype_of(&self, entity: EntityId) -> Option<ArchetypeId> {
    let record = self.records.get(entity as usize)?;
    record
      .committed
      .or(record.pending)
      .map(|loc| loc.archetype)
  }

  pub fn archetype(&self, id: ArchetypeId) -> Option<&Archetype> {
    self.archetypes.get(id as usize)
  }

  pub fn archetype_count(&self) -> usize {
    self.archetypes.len()
  }

  /// Every archetype whose signature is a superset of `signature`. A linear
  /// scan; archetype count stays small relative to entity count.
  pub fn matching<'a>(
    &'a self,
    signature: &'a Signature,
  ) -> impl Iterator<Item = &'a Archetype> + 'a {
    self
      .archetypes
      .iter()
      .filter(move |a| a.signature().contains_all(signature))
  }

  pub fn matching_mut<'a>(
    &'a mut self,
    signature: &'a Signature,
  ) -> impl Iterator<Item = &'a mut Archetype> + 'a {
    self
      .archetypes
      .iter_mut()
      .filter(move |a| a.signature().contains_all(signature))
  }

  /// Applies every queued structural change. Must run single threaded, after
  /// all readers of the current phase have finished: committed buffers are
  /// mutated in place.
  ///
  /// Order per commit: moved-out source rows are cleared first, then staged
  /// adds are committed, then destroys are applied, so a destroy queued
  /// before a move in the same phase still finds the row it targets.
  pub fn commit(&mut self) {
    #[cfg(feature = "debug")]
    trace!("Committing queued structural changes");

    self.sync_component_types();

    // clear committed rows whose values moved into another archetype's
    // staging; must happen before adds so records still hold the old rows
    for a in 0..self.archetypes.len() {
      for moved in self.archetypes[a].take_moved_out() {
        let record = &mut self.records[moved.entity as usize];
        let loc = record
          .committed
          .take()
          .expect("moved-out entity without a committed row");
        debug_assert_eq!(loc.archetype, a as ArchetypeId);

        let swapped = self.archetypes[a].swap_remove_committed(loc.row, Some(&moved.keep));
        if let Some(swapped) = swapped {
          self.records[swapped as usize].committed.as_mut().unwrap().row = loc.row;
        }
      }
    }

    // commit staged adds and promote pending locations
    for a in 0..self.archetypes.len() {
      let (base, added) = self.archetypes[a].apply_adds();
      for (i, entity) in added.into_iter().enumerate() {
        let record = &mut self.records[entity as usize];
        record.committed = Some(Location {
          archetype: a as ArchetypeId,
          row: base + i,
        });
        record.pending = None;
      }
    }

    // destroys run last; the row is resolved through the record so an
    // entity that moved in this same commit is still found
    let mut destroys = Vec::new();
    for archetype in &mut self.archetypes {
      destroys.append(&mut archetype.take_destroys());
    }
    for entity in destroys {
      let record = &mut self.records[entity as usize];
      let loc = record
        .committed
        .take()
        .expect("destroy queued for a dead entity");
      record.pending = None;

      let swapped = self.archetypes[loc.archetype as usize].swap_remove_committed(loc.row, None);
      if let Some(swapped) = swapped {
        self.records[swapped as usize].committed.as_mut().unwrap().row = loc.row;
      }
      self.entity_ids.get_mut().unwrap().free.push(entity);
    }
  }

  /// Queues a cross archetype move for `entity`, charting the memoized edge
  /// path from wherever the entity currently is. A later transition
  /// supersedes an earlier uncommitted one: it is computed from the pending
  /// archetype and the superseded staged copy is pulled out immediately.
  fn queue_transition(
    &mut self,
    entity: EntityId,
    adds: Vec<Box<dyn Component>>,
    removes: &[ComponentId],
  ) {
    let record = self.records[entity as usize];
    let source = record
      .pending
      .or(record.committed)
      .expect("structural change queued for a dead entity");

    // adds of already present types fall out as self edges and their values
    // are discarded
    let mut target = source.archetype;
    let mut kept_adds = Vec::with_capacity(adds.len());
    for comp in adds {
      let next = self.edge_add_archetype(target, comp.id());
      if next != target {
        kept_adds.push(comp);
      }
      target = next;
    }
    for &comp in removes {
      target = self.edge_remove_archetype(target, comp);
    }

    if target == source.archetype {
      // the delta nets out; values that only briefly appeared on the path
      // are dropped here
      return;
    }

    let (source_arch, target_arch) = pair_mut(&mut self.archetypes, source.archetype, target);

    let staged_row = target_arch.stage_entity(entity);
    let target_ids = target_arch.component_ids().to_vec();

    let mut keep = Signature::default();
    for &comp in &target_ids {
      if source_arch.has(comp) {
        keep.set(comp);
        let src_column = source_arch.column(comp).unwrap();
        let src_ptr = if record.pending.is_some() {
          src_column.staging.ptr_at(source.row)
        } else {
          src_column.committed.ptr_at(source.row)
        };
        unsafe {
          target_arch
            .column_mut(comp)
            .unwrap()
            .staging
            .push_from(src_ptr)
        };
      } else {
        let pos = kept_adds
          .iter()
          .position(|c| c.id() == comp)
          .expect("missing value for added component");
        target_arch
          .column_mut(comp)
          .unwrap()
          .staging
          .push_boxed(kept_adds.swap_remove(pos));
      }
    }

    // pull the superseded copy out of its old home: the previous pending
    // staging right away, the committed row at commit time
    let swapped = if record.pending.is_some() {
      source_arch.unstage_entity(source.row, &keep)
    } else {
      source_arch.queue_moved_out(entity, keep);
      None
    };

    if let Some(swapped) = swapped {
      self.records[swapped as usize].pending.as_mut().unwrap().row = source.row;
    }
    self.records[entity as usize].pending = Some(Location {
      archetype: target,
      row: staged_row,
    });
  }

  /// The archetype reached from `from` by adding `comp`; a self edge if
  /// `from` already stores it. Creates and wires the edge (and the target
  /// archetype) on first use.
  fn edge_add_archetype(&mut self, from: ArchetypeId, comp: ComponentId) -> ArchetypeId {
    if self.archetypes[from as usize].has(comp) {
      return from;
    }
    if let Some(to) = self.archetypes[from as usize].edge_add(comp) {
      return to;
    }

    let mut ids = self.archetypes[from as usize].component_ids().to_vec();
    let pos = ids.binary_search(&comp).unwrap_err();
    ids.insert(pos, comp);

    let to = match self.archetype_index.get(&ids) {
      Some(&to) => to,
      None => self.create_archetype(ids),
    };
    self.archetypes[from as usize].set_edge_add(comp, to);
    self.archetypes[to as usize].set_edge_remove(comp, from);
    to
  }

  /// The archetype reached from `from` by removing `comp`; a self edge if
  /// `from` does not store it.
  fn edge_remove_archetype(&mut self, from: ArchetypeId, comp: ComponentId) -> ArchetypeId {
    if !self.archetypes[from as usize].has(comp) {
      return from;
    }
    if let Some(to) = self.archetypes[from as usize].edge_remove(comp) {
      return to;
    }

    let mut ids = self.archetypes[from as usize].component_ids().to_vec();
    ids.retain(|c| *c != comp);

    let to = match self.archetype_index.get(&ids) {
      Some(&to) => to,
      None => self.create_archetype(ids),
    };
    self.archetypes[from as usize].set_edge_remove(comp, to);
    self.archetypes[to as usize].set_edge_add(comp, from);
    to
  }

  /// Walks the add chain from the root archetype to the archetype storing
  /// exactly `ids`.
  fn archetype_for(&mut self, ids: &[ComponentId]) -> ArchetypeId {
    let mut current = ROOT;
    for &comp in ids {
      current = self.edge_add_archetype(current, comp);
    }
    current
  }

  fn create_archetype(&mut self, component_ids: Vec<ComponentId>) -> ArchetypeId {
    debug!("Creating Archetype {:?}", component_ids);

    // pick up any types registered since the last structural change so the
    // new archetype's slot table covers them
    self.sync_component_types();

    let id = self.archetypes.len() as ArchetypeId;
    let archetype = Archetype::new(id, component_ids.clone(), self.known_types);
    self.archetypes.push(archetype);
    self.archetype_index.insert(component_ids, id);
    id
  }

  /// Picks up component types registered since the last call and grows every
  /// archetype's per type slot table accordingly.
  fn sync_component_types(&mut self) {
    let count = components::component_count();
    if count > self.known_types {
      self.known_types = count;
      for archetype in &mut self.archetypes {
        archetype.sync_types(count);
      }
    }
  }

  fn record_mut(&mut self, id: EntityId) -> &mut EntityRecord {
    let idx = id as usize;
    if idx >= self.records.len() {
      self.records.resize_with(idx + 1, EntityRecord::default);
    }
    &mut self.records[idx]
  }
}

fn pair_mut(
  archetypes: &mut [Archetype],
  a: ArchetypeId,
  b: ArchetypeId,
) -> (&mut Archetype, &mut Archetype) {
  debug_assert_ne!(a, b);
  let (a, b) = (a as usize, b as usize);
  if a < b {
    let (left, right) = archetypes.split_at_mut(b);
    (&mut left[a], &mut right[0])
  } else {
    let (left, right) = archetypes.split_at_mut(a);
    (&mut right[0], &mut left[b])
  }
}
