use rustc_hash::FxHashMap;

use crate::{
  column::Column,
  components::{self, Component},
  signature::Signature,
  ArchetypeId, ComponentId, EntityId,
};

/// Memoized graph edge: the archetypes reached by adding or removing one
/// component type.
#[derive(Default, Clone, Copy)]
pub(crate) struct ArchetypeEdge {
  pub add: Option<ArchetypeId>,
  pub remove: Option<ArchetypeId>,
}

/// Committed storage plus the staging buffer mirroring it. Staged rows are
/// invisible to committed iteration until the next commit.
pub(crate) struct ColumnPair {
  pub committed: Column,
  pub staging: Column,
}

/// A committed row whose surviving values were copied into another
/// archetype's staging. `keep` marks the columns whose bytes moved on and
/// must not be dropped when the row is cleared.
pub(crate) struct MovedOut {
  pub entity: EntityId,
  pub keep: Signature,
}

/// Storage bucket for all entities sharing one exact set of component types,
/// laid out column-wise with one packed buffer per type.
pub struct Archetype {
  id: ArchetypeId,
  component_ids: Vec<ComponentId>,
  signature: Signature,
  entities: Vec<EntityId>,
  // indexed by component id, with a slot for every type known at the last
  // sync so late registered ids never index out of bounds
  columns: Vec<Option<ColumnPair>>,
  entities_to_add: Vec<EntityId>,
  moved_out: Vec<MovedOut>,
  entities_to_remove: Vec<EntityId>,
  edges: FxHashMap<ComponentId, ArchetypeEdge>,
}

impl Archetype {
  pub(crate) fn new(id: ArchetypeId, component_ids: Vec<ComponentId>, known_types: usize) -> Self {
    debug_assert!(component_ids.windows(2).all(|w| w[0] < w[1]));

    let signature = Signature::from_ids(&component_ids);
    let mut columns: Vec<Option<ColumnPair>> = (0..known_types).map(|_| None).collect();
    for &comp in &component_ids {
      let info = components::component_info(comp);
      columns[comp as usize] = Some(ColumnPair {
        committed: Column::new(info),
        staging: Column::new(info),
      });
    }

    Self {
      id,
      component_ids,
      signature,
      entities: Vec::new(),
      columns,
      entities_to_add: Vec::new(),
      moved_out: Vec::new(),
      entities_to_remove: Vec::new(),
      edges: FxHashMap::default(),
    }
  }

  #[inline]
  pub fn id(&self) -> ArchetypeId {
    self.id
  }

  #[inline]
  pub fn signature(&self) -> &Signature {
    &self.signature
  }

  #[inline]
  pub fn component_ids(&self) -> &[ComponentId] {
    &self.component_ids
  }

  /// Entity ids committed to this archetype; `entities()[row]` owns row `row`
  /// of every column. Order is not stable across commits.
  #[inline]
  pub fn entities(&self) -> &[EntityId] {
    &self.entities
  }

  #[inline]
  pub fn len(&self) -> usize {
    self.entities.len()
  }

  #[inline]
  pub fn is_empty(&self) -> bool {
    self.entities.is_empty()
  }

  #[inline]
  pub fn has(&self, comp: ComponentId) -> bool {
    self.signature.has(comp)
  }

  /// Packed view over the committed values of `C`, parallel to [`entities`].
  ///
  /// [`entities`]: Archetype::entities
  pub fn column_slice<C: Component + 'static>(&self) -> Option<&[C]> {
    let pair = self.columns.get(C::sid() as usize)?.as_ref()?;
    Some(unsafe { pair.committed.as_slice::<C>() })
  }

  /// Mutable packed view over the committed values of `C`.
  pub fn column_slice_mut<C: Component + 'static>(&mut self) -> Option<&mut [C]> {
    let pair = self.columns.get_mut(C::sid() as usize)?.as_mut()?;
    Some(unsafe { pair.committed.as_slice_mut::<C>() })
  }

  pub(crate) fn column(&self, comp: ComponentId) -> Option<&ColumnPair> {
    self.columns.get(comp as usize)?.as_ref()
  }

  pub(crate) fn column_mut(&mut self, comp: ComponentId) -> Option<&mut ColumnPair> {
    self.columns.get_mut(comp as usize)?.as_mut()
  }

  /// Grows the per type slot table after new component registrations.
  pub(crate) fn sync_types(&mut self, known_types: usize) {
    if self.columns.len() < known_types {
      self.columns.resize_with(known_types, || None);
    }
  }

  /// Reserves the next staging row for `entity`. The caller must follow up
  /// with exactly one staged value per stored component type.
  pub(crate) fn stage_entity(&mut self, entity: EntityId) -> usize {
    self.entities_to_add.push(entity);
    self.entities_to_add.len() - 1
  }

  /// Swap-removes staging row `row`, dropping column values not in `keep` and
  /// forgetting the ones whose bytes moved onward. Returns the staged entity
  /// that now occupies `row`, if any.
  pub(crate) fn unstage_entity(&mut self, row: usize, keep: &Signature) -> Option<EntityId> {
    for &comp in &self.component_ids {
      let pair = self.columns[comp as usize].as_mut().unwrap();
      if keep.has(comp) {
        pair.staging.swap_remove_forget(row);
      } else {
        pair.staging.swap_remove_drop(row);
      }
    }
    self.entities_to_add.swap_remove(row);
    self.entities_to_add.get(row).copied()
  }

  /// Appends all staged rows onto committed storage and clears the staging
  /// buffers. Returns the first new committed row and the entities added.
  pub(crate) fn apply_adds(&mut self) -> (usize, Vec<EntityId>) {
    let base = self.entities.len();
    let added = std::mem::take(&mut self.entities_to_add);
    self.entities.extend_from_slice(&added);

    for &comp in &self.component_ids {
      let pair = self.columns[comp as usize].as_mut().unwrap();
      debug_assert_eq!(pair.staging.len(), added.len());
      let ColumnPair { committed, staging } = pair;
      committed.append_from(staging);
    }

    (base, added)
  }

  /// Swap-removes committed row `row` from every column. With `keep`, values
  /// of the marked types are forgotten instead of dropped (their bytes moved
  /// to another archetype); without it the whole row is destroyed. Returns
  /// the entity that now occupies `row`, if any.
  pub(crate) fn swap_remove_committed(
    &mut self,
    row: usize,
    keep: Option<&Signature>,
  ) -> Option<EntityId> {
    for &comp in &self.component_ids {
      let pair = self.columns[comp as usize].as_mut().unwrap();
      match keep {
        Some(keep) if keep.has(comp) => pair.committed.swap_remove_forget(row),
        _ => pair.committed.swap_remove_drop(row),
      }
    }
    self.entities.swap_remove(row);
    self.entities.get(row).copied()
  }

  pub(crate) fn edge_add(&self, comp: ComponentId) -> Option<ArchetypeId> {
    self.edges.get(&comp).and_then(|e| e.add)
  }

  pub(crate) fn edge_remove(&self, comp: ComponentId) -> Option<ArchetypeId> {
    self.edges.get(&comp).and_then(|e| e.remove)
  }

  pub(crate) fn set_edge_add(&mut self, comp: ComponentId, to: ArchetypeId) {
    self.edges.entry(comp).or_default().add = Some(to);
  }

  pub(crate) fn set_edge_remove(&mut self, comp: ComponentId, to: ArchetypeId) {
    self.edges.entry(comp).or_default().remove = Some(to);
  }

  pub(crate) fn queue_moved_out(&mut self, entity: EntityId, keep: Signature) {
    self.moved_out.push(MovedOut { entity, keep });
  }

  pub(crate) fn take_moved_out(&mut self) -> Vec<MovedOut> {
    std::mem::take(&mut self.moved_out)
  }

  pub(crate) fn queue_destroy(&mut self, entity: EntityId) {
    self.entities_to_remove.push(entity);
  }

  pub(crate) fn take_destroys(&mut self) -> Vec<EntityId> {
    std::mem::take(&mut self.entities_to_remove)
  }
}
