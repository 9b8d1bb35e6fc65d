use std::alloc::{Layout, alloc, dealloc, handle_alloc_error};
use std::any::type_name;
use std::fmt;
use std::marker::PhantomData;
use std::ptr::{self, NonNull};

use crate::IndexWidth;

/// One fixed-capacity block of storage in a [`BlockPool`][crate::BlockPool].
///
/// The block owns a contiguous array of `BLOCK_CAPACITY` slots. Each slot is either occupied by
/// a live `T` or vacant, in which case its first bytes hold the index of the next vacant slot.
/// The vacant slots form a stack threaded through the slots themselves (an intrusive freelist),
/// with `first_free` as the top of the stack.
///
/// There is no per-slot occupancy marker. Whether a slot is occupied is only known through the
/// freelist, so the block trusts its callers to only remove what they previously inserted.
///
/// Blocks are linked into a singly linked list via `next`. The block list is managed by the pool.
pub(crate) struct Block<T, const BLOCK_CAPACITY: usize> {
    first_slot_ptr: NonNull<u8>,

    /// Index of the most recently freed slot, or `BLOCK_CAPACITY` if every slot is occupied.
    first_free: usize,

    /// Number of slots that hold a live item. The block is full when this reaches capacity,
    /// which always coincides with `first_free` being the sentinel.
    used: usize,

    next: Option<Box<Self>>,

    _item: PhantomData<T>,
}

impl<T, const BLOCK_CAPACITY: usize> Block<T, BLOCK_CAPACITY> {
    const INDEX_WIDTH: IndexWidth = IndexWidth::for_capacity(BLOCK_CAPACITY);

    /// Allocates a block with every slot vacant and chained in order (0, 1, 2, ...).
    ///
    /// # Panics
    ///
    /// Panics if the block capacity is zero.
    #[must_use]
    pub(crate) fn new() -> Self {
        assert!(BLOCK_CAPACITY > 0, "Block must have non-zero capacity");

        let layout = Self::storage_layout();

        // SAFETY: The layout is valid and non-zero-sized because the capacity is non-zero
        // and every slot is at least as large as the freelist index.
        let first_slot_ptr =
            NonNull::new(unsafe { alloc(layout) }).unwrap_or_else(|| handle_alloc_error(layout));

        for index in 0..BLOCK_CAPACITY {
            let slot_ptr = Self::slot_ptr_from(first_slot_ptr, index);

            // For the last slot this is the sentinel, marking the end of the chain.
            let next_free = index
                .checked_add(1)
                .expect("guarded by capacity fitting into the allocation");

            // SAFETY: The slot lies within our allocation and is aligned for the index
            // because slot alignment is at least the index alignment.
            unsafe {
                Self::INDEX_WIDTH.write(slot_ptr.as_ptr(), next_free);
            }
        }

        Self {
            first_slot_ptr,
            first_free: 0,
            used: 0,
            next: None,
            _item: PhantomData,
        }
    }

    /// Layout of one slot: large enough for either an item or a freelist index.
    #[must_use]
    fn slot_layout() -> Layout {
        let item = Layout::new::<T>();
        let index = Self::INDEX_WIDTH.layout();

        Layout::from_size_align(
            item.size().max(index.size()),
            item.align().max(index.align()),
        )
        .expect("slot layout is the union of two valid layouts")
        .pad_to_align()
    }

    #[must_use]
    fn storage_layout() -> Layout {
        let slot = Self::slot_layout();

        let size = slot
            .size()
            .checked_mul(BLOCK_CAPACITY)
            .expect("block storage size overflows usize - reduce the block capacity");

        Layout::from_size_align(size, slot.align())
            .expect("block storage size exceeds isize::MAX - reduce the block capacity")
    }

    #[must_use]
    fn slot_ptr_from(first_slot_ptr: NonNull<u8>, index: usize) -> NonNull<u8> {
        assert!(
            index < BLOCK_CAPACITY,
            "slot {index} index out of bounds in block of {}",
            type_name::<T>()
        );

        // Cannot overflow because the whole array fits in the allocation.
        let offset = index.wrapping_mul(Self::slot_layout().size());

        // SAFETY: Guarded by the bounds check above, so the pointer stays in our allocation.
        unsafe { first_slot_ptr.add(offset) }
    }

    #[must_use]
    fn slot_ptr(&self, index: usize) -> NonNull<u8> {
        Self::slot_ptr_from(self.first_slot_ptr, index)
    }

    #[must_use]
    #[cfg_attr(test, mutants::skip)] // Can be mutated to infinitely growing memory use.
    pub(crate) fn used(&self) -> usize {
        self.used
    }

    #[must_use]
    pub(crate) fn is_empty(&self) -> bool {
        self.used == 0
    }

    #[must_use]
    pub(crate) fn is_full(&self) -> bool {
        self.used == BLOCK_CAPACITY
    }

    /// Whether `ptr` points into the slot array of this block.
    #[must_use]
    pub(crate) fn contains(&self, ptr: NonNull<T>) -> bool {
        let start = self.first_slot_ptr.as_ptr().addr();

        // Cannot overflow because the allocation itself fits in the address space.
        let end = start.wrapping_add(Self::storage_layout().size());

        (start..end).contains(&ptr.as_ptr().addr())
    }

    #[must_use]
    pub(crate) fn next(&self) -> Option<&Self> {
        self.next.as_deref()
    }

    #[must_use]
    pub(crate) fn next_mut(&mut self) -> Option<&mut Self> {
        self.next.as_deref_mut()
    }

    /// Detaches and returns the rest of the list following this block.
    #[must_use]
    pub(crate) fn take_next(&mut self) -> Option<Box<Self>> {
        self.next.take()
    }

    pub(crate) fn set_next(&mut self, next: Option<Box<Self>>) {
        self.next = next;
    }

    /// Moves `value` into the slot at the top of the freelist and returns a pointer to it.
    ///
    /// # Panics
    ///
    /// Panics if the block is full.
    #[must_use]
    pub(crate) fn insert(&mut self, value: T) -> NonNull<T> {
        assert!(
            !self.is_full(),
            "cannot insert into a full block of {}",
            type_name::<T>()
        );

        self.used = self
            .used
            .checked_add(1)
            .expect("guarded by the block not being full");

        // Pop the next free index from the stack of free slots.
        let index = self.first_free;
        let slot_ptr = self.slot_ptr(index);

        // SAFETY: The slot is vacant (it is the top of the freelist), so it holds an index of
        // our width and the pointer is valid and aligned for reading it.
        let next_free = unsafe { Self::INDEX_WIDTH.read(slot_ptr.as_ptr()) };

        let item_ptr = slot_ptr.cast::<T>();

        // SAFETY: Slots are sized and aligned for T. The slot is vacant, so we are not
        // overwriting a live item.
        unsafe {
            item_ptr.write(value);
        }

        self.first_free = next_free;

        item_ptr
    }

    /// Drops the item at `ptr` and pushes its slot onto the freelist.
    ///
    /// # Panics
    ///
    /// Panics if `ptr` is outside this block or does not point to the start of a slot.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by [`insert()`][Self::insert] on this block and the item
    /// must not have been removed since.
    pub(crate) unsafe fn remove(&mut self, ptr: NonNull<T>) {
        assert!(
            self.contains(ptr),
            "cannot remove an item that is outside the block of {}",
            type_name::<T>()
        );

        // Cannot underflow because `contains()` verified the pointer is past the start.
        let offset = ptr
            .as_ptr()
            .addr()
            .wrapping_sub(self.first_slot_ptr.as_ptr().addr());

        let slot_size = Self::slot_layout().size();

        assert!(
            offset.checked_rem(slot_size) == Some(0),
            "cannot remove an item from a pointer that is not at the start of a slot in block of {}",
            type_name::<T>()
        );

        let index = offset
            .checked_div(slot_size)
            .expect("slot size is never zero because slots hold at least an index");

        // If the destructor panics, the slot simply stays occupied forever.
        // SAFETY: The caller guarantees the slot holds a live item that was not yet removed.
        unsafe {
            ptr::drop_in_place(ptr.as_ptr());
        }

        self.used = self
            .used
            .checked_sub(1)
            .expect("removed an item from a block that has no live items");

        // Push the slot onto the freelist.
        // SAFETY: The slot is vacant now and is aligned for the index.
        unsafe {
            Self::INDEX_WIDTH.write(self.slot_ptr(index).as_ptr(), self.first_free);
        }

        self.first_free = index;
    }

    /// Walks the freelist and checks that it is consistent with the occupancy count.
    #[cfg(test)]
    #[cfg_attr(test, mutants::skip)] // This is essentially test logic, mutation is meaningless.
    pub(crate) fn integrity_check(&self) {
        let mut visited = vec![false; BLOCK_CAPACITY];
        let mut vacant: usize = 0;
        let mut index = self.first_free;

        while index != BLOCK_CAPACITY {
            let seen = visited
                .get_mut(index)
                .unwrap_or_else(|| panic!("freelist index {index} is out of bounds"));

            assert!(!*seen, "freelist visits slot {index} twice");
            *seen = true;
            vacant += 1;

            // SAFETY: Slots on the freelist are vacant and hold an index.
            index = unsafe { Self::INDEX_WIDTH.read(self.slot_ptr(index).as_ptr()) };
        }

        assert_eq!(
            vacant + self.used,
            BLOCK_CAPACITY,
            "freelist length does not match occupancy"
        );
    }
}

impl<T, const BLOCK_CAPACITY: usize> Drop for Block<T, BLOCK_CAPACITY> {
    fn drop(&mut self) {
        // Live items are intentionally not dropped here - without a per-slot marker we cannot
        // even tell which slots hold them. Only the storage goes away.

        // SAFETY: The layout must match between alloc and dealloc. It does.
        unsafe {
            dealloc(self.first_slot_ptr.as_ptr(), Self::storage_layout());
        }
    }
}

impl<T, const BLOCK_CAPACITY: usize> fmt::Debug for Block<T, BLOCK_CAPACITY> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // We do not follow `next` here, as that would print the entire remaining list.
        f.debug_struct("Block")
            .field("item_type", &format_args!("{}", type_name::<T>()))
            .field("first_slot_ptr", &self.first_slot_ptr)
            .field("first_free", &self.first_free)
            .field("used", &self.used)
            .field("has_next", &self.next.is_some())
            .finish()
    }
}

// SAFETY: Yes, there are raw pointers involved here but nothing inherently non-thread-mobile
// about it, so as long as T itself can move between threads, the block can do so, too.
unsafe impl<T: Send, const BLOCK_CAPACITY: usize> Send for Block<T, BLOCK_CAPACITY> {}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use super::*;

    struct DropCounter {
        drops: Rc<Cell<usize>>,
    }

    impl Drop for DropCounter {
        fn drop(&mut self) {
            self.drops.set(self.drops.get() + 1);
        }
    }

    #[test]
    fn smoke_test() {
        let mut block = Block::<u32, 3>::new();

        let a = block.insert(42);
        let b = block.insert(43);
        let c = block.insert(44);

        // SAFETY: The items are live until removed.
        unsafe {
            assert_eq!(a.read(), 42);
            assert_eq!(b.read(), 43);
            assert_eq!(c.read(), 44);
        }

        assert_eq!(block.used(), 3);
        assert!(block.is_full());
        block.integrity_check();

        // SAFETY: b was inserted into this block and not yet removed.
        unsafe {
            block.remove(b);
        }

        assert_eq!(block.used(), 2);
        assert!(!block.is_full());
        block.integrity_check();

        let d = block.insert(45);

        // The most recently freed slot is reused first.
        assert_eq!(d, b);
        assert!(block.is_full());
        block.integrity_check();
    }

    #[test]
    fn fills_slots_in_order() {
        let mut block = Block::<u64, 4>::new();

        let first = block.insert(1);
        let second = block.insert(2);

        let stride = Block::<u64, 4>::slot_layout().size();
        assert_eq!(second.as_ptr().addr() - first.as_ptr().addr(), stride);
    }

    #[test]
    fn freed_slots_are_reused_lifo() {
        let mut block = Block::<u16, 4>::new();

        let a = block.insert(1);
        let b = block.insert(2);
        let c = block.insert(3);

        // SAFETY: All three are live and removed exactly once.
        unsafe {
            block.remove(a);
            block.remove(c);
            block.remove(b);
        }

        block.integrity_check();

        assert_eq!(block.insert(4), b);
        assert_eq!(block.insert(5), c);
        assert_eq!(block.insert(6), a);
        block.integrity_check();
    }

    #[test]
    fn remove_drops_item() {
        let drops = Rc::new(Cell::new(0));
        let mut block = Block::<DropCounter, 2>::new();

        let item = block.insert(DropCounter {
            drops: Rc::clone(&drops),
        });
        assert_eq!(drops.get(), 0);

        // SAFETY: The item is live and removed exactly once.
        unsafe {
            block.remove(item);
        }

        assert_eq!(drops.get(), 1);
        assert!(block.is_empty());
    }

    #[test]
    fn drop_does_not_drop_items() {
        let drops = Rc::new(Cell::new(0));
        let mut block = Block::<DropCounter, 2>::new();

        _ = block.insert(DropCounter {
            drops: Rc::clone(&drops),
        });

        drop(block);

        assert_eq!(drops.get(), 0);
    }

    #[test]
    fn contains_only_own_storage() {
        let mut block = Block::<u32, 2>::new();
        let other = Block::<u32, 2>::new();

        let item = block.insert(7);
        let mut local = 7_u32;

        assert!(block.contains(item));
        assert!(!other.contains(item));
        assert!(!block.contains(NonNull::from(&mut local)));
    }

    #[test]
    fn slot_overlays_index_on_item() {
        // A one-byte item with a one-byte index needs no extra room.
        assert_eq!(Block::<u8, 16>::slot_layout().size(), 1);

        // A one-byte item with a two-byte index takes the size of the index.
        assert_eq!(Block::<u8, 200>::slot_layout().size(), 2);

        // Large items are never enlarged by the index.
        assert_eq!(Block::<[u64; 4], 200>::slot_layout().size(), 32);
    }

    #[test]
    fn zero_sized_items_get_distinct_slots() {
        let mut block = Block::<(), 3>::new();

        let a = block.insert(());
        let b = block.insert(());
        let c = block.insert(());

        assert_ne!(a, b);
        assert_ne!(b, c);
        assert_ne!(a, c);
        assert!(block.is_full());
    }

    #[test]
    fn wide_index_block_works() {
        let mut block = Block::<u8, 300>::new();

        let items = (0..300_u16)
            .map(|i| block.insert(u8::try_from(i % 256).unwrap()))
            .collect::<Vec<_>>();

        assert!(block.is_full());
        block.integrity_check();

        for item in items {
            // SAFETY: Every item is live and removed exactly once.
            unsafe {
                block.remove(item);
            }
        }

        assert!(block.is_empty());
        block.integrity_check();
    }

    #[test]
    #[should_panic]
    fn panic_when_full() {
        let mut block = Block::<u32, 2>::new();

        _ = block.insert(1);
        _ = block.insert(2);
        _ = block.insert(3);
    }

    #[test]
    #[should_panic]
    fn remove_foreign_pointer_panics() {
        let mut block = Block::<u32, 2>::new();
        let mut local = 5_u32;

        // SAFETY: The block checks the pointer before touching it and panics.
        unsafe {
            block.remove(NonNull::from(&mut local));
        }
    }

    #[test]
    #[should_panic]
    fn zero_capacity_is_panic() {
        drop(Block::<u32, 0>::new());
    }
}
