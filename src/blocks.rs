use std::{
    cell::{Cell, UnsafeCell},
    fmt,
    mem::MaybeUninit,
    ptr,
    ptr::NonNull,
};

use crate::ledger;

/// Hard cap on either counter. Exceeding it means handles are being forged
/// (e.g. via `mem::forget` loops) faster than memory can hold them.
const MAX_COUNT: usize = isize::MAX as usize;

/// The two reference counters of an ownership group.
///
/// Plain `Cell` arithmetic, no atomics: everything built on top of this is
/// `!Send` and `!Sync`, and the compiler enforces that through `NonNull`.
pub(crate) struct Counters
{
    strong: Cell<usize>,
    weak: Cell<usize>,
}

impl Counters
{
    /// Counters for a freshly adopted payload: one strong holder, no weak.
    fn new_owned() -> Self
    {
        Counters {
            strong: Cell::new(1),
            weak: Cell::new(0),
        }
    }

    pub(crate) fn strong(&self) -> usize { self.strong.get() }

    pub(crate) fn weak(&self) -> usize { self.weak.get() }

    fn retain(counter: &Cell<usize>)
    {
        let n = counter.get() + 1;
        assert!(n <= MAX_COUNT, "reference counter overflow");
        counter.set(n);
    }

    fn release(counter: &Cell<usize>)
    {
        debug_assert!(counter.get() > 0, "reference counter underflow");
        counter.set(counter.get() - 1);
    }
}

/// Control block capability: the counters plus the ability to tear down the
/// managed payload without knowing its type at the use site.
///
/// `destroy_payload` must be called exactly once, by the operation that
/// observes the strong count transition to zero, and never after the block
/// has been deallocated.
pub(crate) trait Block
{
    fn counters(&self) -> &Counters;

    unsafe fn destroy_payload(&self);
}

/// Block for a payload that lives in its own heap allocation.
///
/// Destroying the payload frees that allocation; the block itself is a
/// second, independent allocation freed later. `T` may be unsized, so a
/// `dyn Trait` payload is destroyed through its vtable with the concrete
/// type's destructor and layout.
struct SeparateBlock<T: ?Sized + 'static>
{
    counters: Counters,
    payload: NonNull<T>,
}

impl<T: ?Sized + 'static> Block for SeparateBlock<T>
{
    fn counters(&self) -> &Counters { &self.counters }

    unsafe fn destroy_payload(&self) { drop(Box::from_raw(self.payload.as_ptr())) }
}

/// Block with the payload embedded next to the counters: the single
/// allocation produced by the construct-and-wrap factory.
///
/// Destroying the payload runs its destructor in place; the memory is only
/// returned when the block itself is deallocated. `MaybeUninit` keeps the
/// block's own drop glue from running the destructor a second time.
struct InlineBlock<T: 'static>
{
    counters: Counters,
    payload: UnsafeCell<MaybeUninit<T>>,
}

impl<T: 'static> Block for InlineBlock<T>
{
    fn counters(&self) -> &Counters { &self.counters }

    unsafe fn destroy_payload(&self) { (*self.payload.get()).assume_init_drop() }
}

/// Shared handle to a type-erased control block.
///
/// This is the only type that touches the counters, and it owns the whole
/// counting protocol: payload teardown at the strong zero-transition, block
/// deallocation at the combined zero-transition, each exactly once.
pub(crate) struct BlockRef(NonNull<dyn Block>);

impl Clone for BlockRef
{
    fn clone(&self) -> Self { BlockRef(self.0) }
}
impl Copy for BlockRef {}

impl fmt::Debug for BlockRef
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_tuple("BlockRef").field(&self.0.cast::<()>()).finish()
    }
}

impl BlockRef
{
    /// Allocates a `SeparateBlock` adopting an already-boxed payload.
    /// Strong count starts at 1.
    pub(crate) fn adopt_boxed<T: ?Sized + 'static>(boxed: Box<T>) -> (BlockRef, NonNull<T>)
    {
        let payload = NonNull::from(Box::leak(boxed));
        let block = Box::leak(Box::new(SeparateBlock {
            counters: Counters::new_owned(),
            payload,
        }));
        ledger::separate_block_allocated();
        (BlockRef(NonNull::from(block as &mut dyn Block)), payload)
    }

    /// Allocates an `InlineBlock` and moves the payload into it. One
    /// allocation for counters and payload together; the payload is in
    /// place before any handle can observe it, so a failed allocation
    /// leaves nothing half-built behind. Strong count starts at 1.
    pub(crate) fn adopt_inline<T: 'static>(value: T) -> (BlockRef, NonNull<T>)
    {
        let block = NonNull::from(Box::leak(Box::new(InlineBlock {
            counters: Counters::new_owned(),
            payload: UnsafeCell::new(MaybeUninit::new(value)),
        })) as &mut dyn Block);
        // the payload pointer must be derived from the block pointer that
        // every later access goes through, not from an earlier reborrow
        let payload = unsafe {
            let inline = block.cast::<InlineBlock<T>>().as_ptr();
            NonNull::new_unchecked(UnsafeCell::raw_get(ptr::addr_of!((*inline).payload)).cast::<T>())
        };
        ledger::inline_block_allocated();
        (BlockRef(block), payload)
    }

    fn counters(&self) -> &Counters { unsafe { self.0.as_ref().counters() } }

    pub(crate) fn strong_count(&self) -> usize { self.counters().strong() }

    pub(crate) fn weak_count(&self) -> usize { self.counters().weak() }

    pub(crate) fn retain_strong(&self)
    {
        debug_assert!(self.counters().strong() > 0);
        Counters::retain(&self.counters().strong);
    }

    pub(crate) fn retain_weak(&self) { Counters::retain(&self.counters().weak) }

    /// Promotion: takes a strong retention only while the payload is still
    /// alive. This is the one counting operation a weak holder may use to
    /// become a strong one.
    pub(crate) fn try_retain_strong(&self) -> bool
    {
        if self.counters().strong() == 0 {
            false
        } else {
            Counters::retain(&self.counters().strong);
            true
        }
    }

    /// Releases a strong retention. On the zero-transition the payload is
    /// destroyed; the block is deallocated if no weak holders remain.
    ///
    /// The releasing holder keeps a temporary weak retention across the
    /// payload destructor: the destructor may itself drop the group's last
    /// weak handle, and the block must not be freed under us. Observers
    /// inside the destructor already see the group as expired.
    pub(crate) unsafe fn release_strong(self)
    {
        let counters = self.counters();
        Counters::release(&counters.strong);
        if counters.strong() == 0 {
            Counters::retain(&counters.weak);
            self.0.as_ref().destroy_payload();
            ledger::payload_destroyed();
            self.release_weak();
        }
    }

    /// Releases a weak retention, deallocating the block on the combined
    /// zero-transition. Never touches the payload.
    pub(crate) unsafe fn release_weak(self)
    {
        let counters = self.counters();
        Counters::release(&counters.weak);
        if counters.strong() == 0 && counters.weak() == 0 {
            drop(Box::from_raw(self.0.as_ptr()));
            ledger::block_freed();
        }
    }
}
