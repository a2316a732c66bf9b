use std::{
    fmt,
    hash::{Hash, Hasher},
    marker::PhantomData,
    ops::Deref,
    ptr::NonNull,
};

use crate::blocks::BlockRef;

/// The observed address paired with the block that keeps it alive. The two
/// are independent on purpose: a projected handle observes an address that
/// is not the one whose lifetime the block tracks.
struct Handle<T: ?Sized>
{
    value: NonNull<T>,
    block: BlockRef,
}

impl<T: ?Sized> Clone for Handle<T>
{
    fn clone(&self) -> Self
    {
        Handle {
            value: self.value,
            block: self.block,
        }
    }
}
impl<T: ?Sized> Copy for Handle<T> {}

/// Shared-ownership pointer.
///
/// Every live clone of a `Shared` is a strong holder of one ownership
/// group; the payload is destroyed the moment the last strong holder
/// releases it, and the bookkeeping block survives until the last weak
/// observer is gone too.
///
/// Unlike `Rc` this handle has an explicit empty state, reachable through
/// [`Shared::null`] and [`Shared::reset`]. Dereferencing an empty handle
/// panics; [`Shared::get`] is the non-panicking accessor.
///
/// Counters are plain `Cell`s, so none of these types cross threads.
pub struct Shared<T: ?Sized + 'static>
{
    inner: Option<Handle<T>>,
    _owns: PhantomData<T>,
}

impl<T: ?Sized + 'static> Shared<T>
{
    fn from_handle(handle: Handle<T>) -> Self
    {
        Shared {
            inner: Some(handle),
            _owns: PhantomData,
        }
    }

    /// The empty handle: no payload, no block, count zero.
    pub fn null() -> Self
    {
        Shared {
            inner: None,
            _owns: PhantomData,
        }
    }

    /// Constructs the payload and its control block in one allocation and
    /// returns the sole strong holder.
    pub fn new(value: T) -> Self
    where
        T: Sized,
    {
        let (block, value) = BlockRef::adopt_inline(value);
        Shared::from_handle(Handle { value, block })
    }

    /// Adopts a uniquely-owned payload, allocating a control block beside
    /// it. This is the boundary with single-owner pointers: a `Box<V>` can
    /// be coerced to `Box<dyn Trait>` on the way in, and the block will
    /// still run the concrete destructor and free the concrete layout.
    pub fn from_box(boxed: Box<T>) -> Self
    {
        let (block, value) = BlockRef::adopt_boxed(boxed);
        Shared::from_handle(Handle { value, block })
    }

    /// Adopts a raw owning pointer, as if by `from_box(Box::from_raw(raw))`.
    /// A null pointer yields the empty handle.
    ///
    /// # Safety
    ///
    /// `raw` must have come from `Box::into_raw` (or be null) and must not
    /// be owned by anything else: adopting a pointer twice, or adopting one
    /// that is still owned elsewhere, double-frees.
    pub unsafe fn from_raw(raw: *mut T) -> Self
    {
        match NonNull::new(raw) {
            Some(ptr) => Shared::from_box(Box::from_raw(ptr.as_ptr())),
            None => Shared::null(),
        }
    }

    /// Aliasing projection: the result shares this handle's ownership group
    /// (strong count goes up by one) but observes the address `f` picks out
    /// of the payload, typically a field or a trait-object view of it.
    ///
    /// This is also the up-conversion path:
    ///
    /// ```
    /// # use braid::Shared;
    /// # trait Animal {}
    /// # struct Dog;
    /// # impl Animal for Dog {}
    /// let dog = Shared::new(Dog);
    /// let animal: Shared<dyn Animal> = dog.project(|d| d as &dyn Animal);
    /// assert_eq!(dog.strong_count(), 2);
    /// assert!(animal == dog);
    /// ```
    ///
    /// Projecting an empty handle yields an empty handle.
    pub fn project<U: ?Sized + 'static>(&self, f: impl FnOnce(&T) -> &U) -> Shared<U>
    {
        match &self.inner {
            Some(handle) => {
                let value = NonNull::from(f(unsafe { handle.value.as_ref() }));
                handle.block.retain_strong();
                Shared::from_handle(Handle {
                    value,
                    block: handle.block,
                })
            }
            None => Shared::null(),
        }
    }

    /// Produces a weak observer of this handle's ownership group. An empty
    /// handle demotes to an empty observer.
    pub fn downgrade(&self) -> Weak<T>
    {
        if let Some(handle) = &self.inner {
            handle.block.retain_weak();
        }
        Weak { inner: self.inner }
    }

    /// Releases this handle's ownership and leaves it empty. If it was the
    /// last strong holder, the payload is destroyed here. A no-op on an
    /// already-empty handle.
    pub fn reset(&mut self)
    {
        if let Some(handle) = self.inner.take() {
            unsafe { handle.block.release_strong() }
        }
    }

    /// Releases current ownership and adopts `boxed` under a brand-new
    /// control block with a strong count of 1, regardless of how many
    /// holders the old group had.
    pub fn reset_to(&mut self, boxed: Box<T>) { *self = Shared::from_box(boxed) }

    pub fn get(&self) -> Option<&T>
    {
        self.inner
            .as_ref()
            .map(|handle| unsafe { handle.value.as_ref() })
    }

    /// The observed address, if any. For a projected handle this is the
    /// projected address, not the one the block tracks.
    pub fn as_ptr(&self) -> Option<NonNull<T>> { self.inner.as_ref().map(|handle| handle.value) }

    /// Number of strong holders in this handle's group, zero when empty.
    pub fn strong_count(&self) -> usize
    {
        match &self.inner {
            Some(handle) => handle.block.strong_count(),
            None => 0,
        }
    }

    /// Number of weak observers of this handle's group, zero when empty.
    pub fn weak_count(&self) -> usize
    {
        match &self.inner {
            Some(handle) => handle.block.weak_count(),
            None => 0,
        }
    }

    pub fn is_null(&self) -> bool { self.inner.is_none() }

    fn addr(&self) -> usize
    {
        match &self.inner {
            Some(handle) => handle.value.as_ptr() as *const () as usize,
            None => 0,
        }
    }
}

impl<T: ?Sized + 'static> Clone for Shared<T>
{
    fn clone(&self) -> Self
    {
        if let Some(handle) = &self.inner {
            handle.block.retain_strong();
        }
        Shared {
            inner: self.inner,
            _owns: PhantomData,
        }
    }
}

impl<T: ?Sized + 'static> Drop for Shared<T>
{
    fn drop(&mut self) { self.reset() }
}

impl<T: ?Sized + 'static> Default for Shared<T>
{
    fn default() -> Self { Shared::null() }
}

impl<T: ?Sized + 'static> Deref for Shared<T>
{
    type Target = T;

    fn deref(&self) -> &T { self.get().expect("dereferenced an empty Shared handle") }
}

impl<T: ?Sized + 'static> From<Box<T>> for Shared<T>
{
    fn from(boxed: Box<T>) -> Self { Shared::from_box(boxed) }
}

/// Handles compare by observed address, not by group: two members of one
/// group projected to different sub-objects are unequal, and two empty
/// handles are equal.
impl<T: ?Sized + 'static, U: ?Sized + 'static> PartialEq<Shared<U>> for Shared<T>
{
    fn eq(&self, other: &Shared<U>) -> bool
    {
        match (&self.inner, &other.inner) {
            (Some(a), Some(b)) => a.value.as_ptr() as *const () == b.value.as_ptr() as *const (),
            (None, None) => true,
            _ => false,
        }
    }
}

impl<T: ?Sized + 'static> Eq for Shared<T> {}

impl<T: ?Sized + 'static> Hash for Shared<T>
{
    fn hash<H: Hasher>(&self, state: &mut H) { self.addr().hash(state) }
}

impl<T: ?Sized + fmt::Debug + 'static> fmt::Debug for Shared<T>
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        let mut f = f.debug_tuple("Shared");
        if let Some(value) = self.get() {
            f.field(&value);
        }
        f.finish()
    }
}

/// Weak observer of an ownership group.
///
/// Keeps the bookkeeping block alive but not the payload; the only way to
/// reach the payload is [`Weak::upgrade`], which succeeds exactly while
/// some strong holder still exists.
pub struct Weak<T: ?Sized + 'static>
{
    inner: Option<Handle<T>>,
}

impl<T: ?Sized + 'static> Weak<T>
{
    /// The empty observer: no group, always expired.
    pub fn null() -> Self { Weak { inner: None } }

    /// True once the observed group has no strong holders left (or this
    /// observer is empty). The payload is gone; only the block remains.
    pub fn expired(&self) -> bool { self.strong_count() == 0 }

    /// Attempts to re-acquire strong ownership. Returns `None` if the
    /// payload has already been destroyed; otherwise the new holder
    /// observes the same address this observer was demoted from.
    pub fn upgrade(&self) -> Option<Shared<T>>
    {
        match &self.inner {
            Some(handle) if handle.block.try_retain_strong() => {
                Some(Shared::from_handle(*handle))
            }
            _ => None,
        }
    }

    /// Number of strong holders in the observed group, zero when empty.
    pub fn strong_count(&self) -> usize
    {
        match &self.inner {
            Some(handle) => handle.block.strong_count(),
            None => 0,
        }
    }

    pub fn is_null(&self) -> bool { self.inner.is_none() }

    /// Drops this observation and leaves the observer empty. If it was the
    /// last handle of any kind, the block is deallocated here. A no-op on
    /// an already-empty observer.
    pub fn reset(&mut self)
    {
        if let Some(handle) = self.inner.take() {
            unsafe { handle.block.release_weak() }
        }
    }
}

impl<T: ?Sized + 'static> Clone for Weak<T>
{
    fn clone(&self) -> Self
    {
        if let Some(handle) = &self.inner {
            handle.block.retain_weak();
        }
        Weak { inner: self.inner }
    }
}

impl<T: ?Sized + 'static> Drop for Weak<T>
{
    fn drop(&mut self) { self.reset() }
}

impl<T: ?Sized + 'static> Default for Weak<T>
{
    fn default() -> Self { Weak::null() }
}

impl<T: ?Sized + 'static> From<&Shared<T>> for Weak<T>
{
    fn from(shared: &Shared<T>) -> Self { shared.downgrade() }
}

impl<T: ?Sized + 'static> PartialEq for Weak<T>
{
    fn eq(&self, other: &Self) -> bool
    {
        match (&self.inner, &other.inner) {
            (Some(a), Some(b)) => a.value.as_ptr() as *const () == b.value.as_ptr() as *const (),
            (None, None) => true,
            _ => false,
        }
    }
}

impl<T: ?Sized + 'static> Eq for Weak<T> {}

impl<T: ?Sized + fmt::Debug + 'static> fmt::Debug for Weak<T>
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        let mut f = f.debug_tuple("Weak");
        if let Some(strong) = self.upgrade() {
            f.field(&&*strong);
        }
        f.finish()
    }
}
