use std::{
  alloc::{self, Layout},
  ptr::{self, NonNull},
};

use crate::components::{Component, ComponentInfo};

/// Packed, type erased buffer holding all values of one component type for
/// one archetype. Alignment and destruction are driven by the
/// [`ComponentInfo`] the column was created with; typed access goes through
/// the unsafe view methods and is only valid for that exact type.
pub(crate) struct Column {
  info: ComponentInfo,
  data: NonNull<u8>,
  capacity: usize,
  len: usize,
}

// Access is serialized by the storage commit contract: concurrent readers
// only ever observe committed rows between commits.
unsafe impl Send for Column {}
unsafe impl Sync for Column {}

fn dangling(align: usize) -> NonNull<u8> {
  debug_assert!(align.is_power_of_two());
  unsafe { NonNull::new_unchecked(align as *mut u8) }
}

impl Column {
  pub fn new(info: ComponentInfo) -> Self {
    Self {
      info,
      data: dangling(info.align),
      capacity: if info.size == 0 { usize::MAX } else { 0 },
      len: 0,
    }
  }

  #[inline]
  pub fn len(&self) -> usize {
    self.len
  }

  #[inline]
  pub fn info(&self) -> &ComponentInfo {
    &self.info
  }

  fn reserve(&mut self, additional: usize) {
    if self.info.size == 0 || self.len + additional <= self.capacity {
      return;
    }

    let new_capacity = (self.len + additional).next_power_of_two().max(4);
    let new_layout =
      Layout::from_size_align(new_capacity * self.info.size, self.info.align).unwrap();

    let new_data = if self.capacity == 0 {
      unsafe { alloc::alloc(new_layout) }
    } else {
      let old_layout =
        Layout::from_size_align(self.capacity * self.info.size, self.info.align).unwrap();
      unsafe { alloc::realloc(self.data.as_ptr(), old_layout, new_layout.size()) }
    };

    let Some(new_data) = NonNull::new(new_data) else {
      alloc::handle_alloc_error(new_layout);
    };
    self.data = new_data;
    self.capacity = new_capacity;
  }

  /// Pointer to the value in `row`.
  #[inline]
  pub fn ptr_at(&self, row: usize) -> *mut u8 {
    debug_assert!(row < self.len);
    unsafe { self.data.as_ptr().add(row * self.info.size) }
  }

  /// Appends the value behind `src`.
  ///
  /// # Safety
  /// `src` must point to a valid value of this column's component type. The
  /// value is moved into the column; the caller must not drop the source.
  pub unsafe fn push_from(&mut self, src: *const u8) {
    self.reserve(1);
    ptr::copy_nonoverlapping(
      src,
      self.data.as_ptr().add(self.len * self.info.size),
      self.info.size,
    );
    self.len += 1;
  }

  /// Moves a boxed component value into the column, freeing the box without
  /// running the value's destructor.
  pub fn push_boxed(&mut self, comp: Box<dyn Component>) {
    debug_assert_eq!(comp.id(), self.info.id);

    let raw = Box::into_raw(comp);
    let layout = Layout::for_value(unsafe { &*raw });
    unsafe {
      self.push_from(raw as *const u8);
      if layout.size() != 0 {
        alloc::dealloc(raw as *mut u8, layout);
      }
    }
  }

  /// Swap-removes `row`, running the component destructor on it.
  pub fn swap_remove_drop(&mut self, row: usize) {
    if let Some(drop_fn) = self.info.drop {
      unsafe { drop_fn(self.ptr_at(row)) };
    }
    self.swap_remove_forget(row);
  }

  /// Swap-removes `row` without running the destructor. Used when the value's
  /// bytes have been moved to another column.
  pub fn swap_remove_forget(&mut self, row: usize) {
    debug_assert!(row < self.len);
    let last = self.len - 1;
    if row != last && self.info.size != 0 {
      unsafe {
        ptr::copy_nonoverlapping(
          self.data.as_ptr().add(last * self.info.size),
          self.data.as_ptr().add(row * self.info.size),
          self.info.size,
        );
      }
    }
    self.len -= 1;
  }

  /// Moves every value out of `other` onto the end of `self`, leaving `other`
  /// empty. Both columns must store the same component type.
  pub fn append_from(&mut self, other: &mut Column) {
    debug_assert_eq!(self.info.id, other.info.id);
    self.reserve(other.len);
    if self.info.size != 0 {
      unsafe {
        ptr::copy_nonoverlapping(
          other.data.as_ptr(),
          self.data.as_ptr().add(self.len * self.info.size),
          other.len * self.info.size,
        );
      }
    }
    self.len += other.len;
    other.len = 0;
  }

  /// # Safety
  /// `T` must be the component type this column was created for.
  #[inline]
  pub unsafe fn get<T>(&self, row: usize) -> &T {
    debug_assert_eq!(std::mem::size_of::<T>(), self.info.size);
    &*(self.ptr_at(row) as *const T)
  }

  /// # Safety
  /// `T` must be the component type this column was created for.
  #[inline]
  pub unsafe fn get_mut<T>(&mut self, row: usize) -> &mut T {
    debug_assert_eq!(std::mem::size_of::<T>(), self.info.size);
    &mut *(self.ptr_at(row) as *mut T)
  }

  /// # Safety
  /// `T` must be the component type this column was created for.
  pub unsafe fn as_slice<T>(&self) -> &[T] {
    debug_assert_eq!(std::mem::size_of::<T>(), self.info.size);
    std::slice::from_raw_parts(self.data.as_ptr() as *const T, self.len)
  }

  /// # Safety
  /// `T` must be the component type this column was created for.
  pub unsafe fn as_slice_mut<T>(&mut self) -> &mut [T] {
    debug_assert_eq!(std::mem::size_of::<T>(), self.info.size);
    std::slice::from_raw_parts_mut(self.data.as_ptr() as *mut T, self.len)
  }
}

impl Drop for Column {
  fn drop(&mut self) {
    if let Some(drop_fn) = self.info.drop {
      for row in 0..self.len {
        unsafe { drop_fn(self.data.as_ptr().add(row * self.info.size)) };
      }
    }
    if self.info.size != 0 && self.capacity != 0 {
      let layout =
        Layout::from_size_align(self.capacity * self.info.size, self.info.align).unwrap();
      unsafe { alloc::dealloc(self.data.as_ptr(), layout) };
    }
  }
}

#[cfg(test)]
mod test {
  use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
  };

  use crate as strata_ecs;
  use strata_ecs_macros::Component;

  use super::Column;
  use crate::components::{component_info, Component};

  #[derive(Component, PartialEq, Debug)]
  struct Marker {
    value: u64,
  }

  #[derive(Component)]
  struct Counted {
    drops: Arc<AtomicUsize>,
  }

  impl Drop for Counted {
    fn drop(&mut self) {
      self.drops.fetch_add(1, Ordering::SeqCst);
    }
  }

  #[derive(Component)]
  struct Tag {}

  fn column_of<C: Component + 'static>() -> Column {
    Column::new(component_info(C::sid()))
  }

  #[test]
  fn push_and_read() {
    let mut column = column_of::<Marker>();
    column.push_boxed(Box::new(Marker { value: 1 }));
    column.push_boxed(Box::new(Marker { value: 2 }));

    assert_eq!(column.len(), 2);
    assert_eq!(unsafe { column.get::<Marker>(0) }.value, 1);
    assert_eq!(unsafe { column.get::<Marker>(1) }.value, 2);
    assert_eq!(
      unsafe { column.as_slice::<Marker>() },
      &[Marker { value: 1 }, Marker { value: 2 }]
    );
  }

  #[test]
  fn swap_remove_moves_last_into_hole() {
    let mut column = column_of::<Marker>();
    for value in 0..4 {
      column.push_boxed(Box::new(Marker { value }));
    }

    column.swap_remove_drop(1);

    assert_eq!(column.len(), 3);
    assert_eq!(unsafe { column.get::<Marker>(1) }.value, 3);
  }

  #[test]
  fn swap_remove_drop_runs_destructor() {
    let drops = Arc::new(AtomicUsize::new(0));

    let mut column = column_of::<Counted>();
    column.push_boxed(Box::new(Counted {
      drops: drops.clone(),
    }));
    column.push_boxed(Box::new(Counted {
      drops: drops.clone(),
    }));

    column.swap_remove_drop(0);
    assert_eq!(drops.load(Ordering::SeqCst), 1);

    drop(column);
    assert_eq!(drops.load(Ordering::SeqCst), 2);
  }

  #[test]
  fn swap_remove_forget_skips_destructor() {
    let drops = Arc::new(AtomicUsize::new(0));

    let mut column = column_of::<Counted>();
    column.push_boxed(Box::new(Counted {
      drops: drops.clone(),
    }));

    // pretend the value moved elsewhere
    let moved = unsafe { std::ptr::read(column.ptr_at(0) as *const Counted) };
    column.swap_remove_forget(0);
    assert_eq!(drops.load(Ordering::SeqCst), 0);

    drop(moved);
    assert_eq!(drops.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn append_from_drains_staging() {
    let mut committed = column_of::<Marker>();
    let mut staging = column_of::<Marker>();

    committed.push_boxed(Box::new(Marker { value: 0 }));
    staging.push_boxed(Box::new(Marker { value: 1 }));
    staging.push_boxed(Box::new(Marker { value: 2 }));

    committed.append_from(&mut staging);

    assert_eq!(committed.len(), 3);
    assert_eq!(staging.len(), 0);
    assert_eq!(unsafe { committed.get::<Marker>(2) }.value, 2);
  }

  #[test]
  fn zero_sized_components() {
    let mut column = column_of::<Tag>();
    column.push_boxed(Box::new(Tag {}));
    column.push_boxed(Box::new(Tag {}));

    assert_eq!(column.len(), 2);
    column.swap_remove_drop(0);
    assert_eq!(column.len(), 1);
  }
}
