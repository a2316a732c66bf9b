use std::cell::{Cell, RefCell};

use crate::ledger::*;
use crate::pointers::*;

struct DropProbe(&'static Cell<i32>);

impl Drop for DropProbe
{
    fn drop(&mut self) { self.0.set(self.0.get() + 1) }
}

fn probe_cell() -> &'static Cell<i32> { Box::leak(Box::new(Cell::new(0))) }

#[test]
fn strong_count_tracks_holders()
{
    let a = Shared::new(5);
    assert_eq!(a.strong_count(), 1);

    let b = a.clone();
    assert_eq!(a.strong_count(), 2);
    assert_eq!(b.strong_count(), 2);

    // moves transfer the handle without touching the counter
    let c = b;
    assert_eq!(c.strong_count(), 2);

    std::mem::drop(c);
    assert_eq!(a.strong_count(), 1);

    let mut d = a.clone();
    d.reset();
    assert_eq!(a.strong_count(), 1);
    assert!(d.is_null());
}

#[test]
fn last_owner_keeps_value()
{
    let mut a = Shared::new(5);
    let b = a.clone();

    a.reset();

    assert_eq!(b.strong_count(), 1);
    assert_eq!(*b, 5);
    assert!(a.is_null());
    assert_eq!(a.strong_count(), 0);
}

#[test]
fn weak_expires_when_last_owner_goes()
{
    let mut a = Shared::from_box(Box::new(7));
    let w = a.downgrade();

    assert!(!w.expired());
    assert_eq!(w.strong_count(), 1);
    assert_eq!(a.weak_count(), 1);

    a.reset();

    assert!(w.expired());
    assert!(w.upgrade().is_none());
    assert_eq!(w.strong_count(), 0);
}

#[test]
fn upgrade_round_trip()
{
    let x = Shared::new(String::from("braid"));
    let w = x.downgrade();

    let locked = w.upgrade().unwrap();

    assert_eq!(locked.as_ptr(), x.as_ptr());
    assert_eq!(*locked, "braid");
    assert_eq!(x.strong_count(), 2);
}

#[test]
fn projection_shares_lifetime()
{
    struct Tracked
    {
        first: i32,
        _probe: DropProbe,
    }

    let hits = probe_cell();
    let owner = Shared::new(Tracked {
        first: 1,
        _probe: DropProbe(hits),
    });

    let sub = owner.project(|t| &t.first);
    assert_eq!(sub.strong_count(), 2);
    assert_eq!(owner.strong_count(), 2);

    std::mem::drop(owner);

    // the projected handle alone keeps the whole payload alive
    assert_eq!(hits.get(), 0);
    assert_eq!(*sub, 1);
    assert_eq!(sub.strong_count(), 1);

    std::mem::drop(sub);
    assert_eq!(hits.get(), 1);
}

#[test]
fn equality_follows_observed_address()
{
    #[repr(C)]
    struct Pair
    {
        first: i32,
        second: i32,
    }

    let owner = Shared::new(Pair { first: 1, second: 2 });
    let p1 = owner.project(|p| &p.second);
    let p2 = owner.clone();

    assert_eq!(p1.strong_count(), p2.strong_count());
    assert!(p1 != p2);
    assert_eq!(*p1, 2);

    // the first field shares the pair's own address
    let first = owner.project(|p| &p.first);
    assert!(first == owner);
    assert!(first == first.clone());
    assert!(first != p1);

    assert!(Shared::<i32>::null() == Shared::<u8>::null());
    assert!(first != Shared::<i32>::null());
}

#[test]
fn self_assignment_keeps_count()
{
    let mut a = Shared::new(String::from("still here"));
    let w = a.downgrade();

    a = a.clone();

    assert_eq!(a.strong_count(), 1);
    assert_eq!(*a, "still here");
    assert!(!w.expired());
}

#[test]
fn reset_on_empty_is_noop()
{
    let baseline = thread_stats();

    let mut s = Shared::<i32>::default();
    s.reset();
    s.reset();
    assert!(s.is_null());
    assert_eq!(s.strong_count(), 0);
    assert_eq!(s.get(), None);
    assert_eq!(s.as_ptr(), None);

    let mut w = Weak::<i32>::default();
    w.reset();
    assert!(w.is_null());
    assert!(w.expired());
    assert!(w.upgrade().is_none());

    let after = thread_stats();
    assert_eq!(after.live_blocks, baseline.live_blocks);
    assert_eq!(after.blocks_created(), baseline.blocks_created());
}

#[test]
fn reset_to_starts_new_group()
{
    let mut a = Shared::new(1);
    let b = a.clone();

    a.reset_to(Box::new(2));

    assert_eq!(a.strong_count(), 1);
    assert_eq!(*a, 2);
    assert_eq!(b.strong_count(), 1);
    assert_eq!(*b, 1);
    assert!(a != b);
}

#[test]
fn block_outlives_payload_for_weak()
{
    let baseline = thread_stats();
    let hits = probe_cell();

    let strong = Shared::new(DropProbe(hits));
    let weak = strong.downgrade();
    let weak2 = weak.clone();
    assert_eq!(strong.weak_count(), 2);

    assert_eq!(thread_stats().live_blocks, baseline.live_blocks + 1);
    assert_eq!(thread_stats().live_payloads, baseline.live_payloads + 1);

    std::mem::drop(strong);

    // payload destroyed at the strong zero-transition, block still here
    assert_eq!(hits.get(), 1);
    let mid = thread_stats();
    assert_eq!(mid.live_blocks, baseline.live_blocks + 1);
    assert_eq!(mid.live_payloads, baseline.live_payloads);
    assert_eq!(mid.weak_only_blocks(), baseline.weak_only_blocks() + 1);

    std::mem::drop(weak);
    assert_eq!(thread_stats().live_blocks, baseline.live_blocks + 1);

    std::mem::drop(weak2);
    assert_eq!(thread_stats().live_blocks, baseline.live_blocks);
    assert_eq!(hits.get(), 1);
}

#[test]
fn destructor_sees_group_expired()
{
    struct Node
    {
        myself: RefCell<Weak<Node>>,
        hits: &'static Cell<i32>,
    }

    impl Drop for Node
    {
        fn drop(&mut self)
        {
            // other handles of the group must already report it dead,
            // and dropping the last weak handle in here must be safe
            assert!(self.myself.borrow().expired());
            assert!(self.myself.borrow().upgrade().is_none());
            self.myself.borrow_mut().reset();
            self.hits.set(self.hits.get() + 1);
        }
    }

    let baseline = thread_stats();
    let hits = probe_cell();

    let node = Shared::new(Node {
        myself: RefCell::new(Weak::null()),
        hits,
    });
    *node.myself.borrow_mut() = node.downgrade();

    std::mem::drop(node);

    assert_eq!(hits.get(), 1);
    let after = thread_stats();
    assert_eq!(after.live_blocks, baseline.live_blocks);
    assert_eq!(after.live_payloads, baseline.live_payloads);
}

#[test]
fn upcast_destroys_concrete_type()
{
    trait Animal
    {
        fn legs(&self) -> u32;
    }

    struct Dog
    {
        _probe: DropProbe,
    }

    impl Animal for Dog
    {
        fn legs(&self) -> u32 { 4 }
    }

    let hits = probe_cell();

    let boxed: Box<dyn Animal> = Box::new(Dog {
        _probe: DropProbe(hits),
    });
    let adopted = Shared::from_box(boxed);
    assert_eq!(adopted.legs(), 4);

    std::mem::drop(adopted);
    assert_eq!(hits.get(), 1);

    let dog = Shared::new(Dog {
        _probe: DropProbe(hits),
    });
    let view: Shared<dyn Animal> = dog.project(|d| d as &dyn Animal);
    assert_eq!(dog.strong_count(), 2);
    assert_eq!(view.legs(), 4);

    std::mem::drop(dog);
    assert_eq!(hits.get(), 1);

    std::mem::drop(view);
    assert_eq!(hits.get(), 2);
}

#[test]
fn factory_uses_one_allocation_strategy_per_path()
{
    let baseline = thread_stats();

    let _inline = Shared::new(1);
    let _separate = Shared::from_box(Box::new(2));

    let after = thread_stats();
    assert_eq!(after.inline_blocks, baseline.inline_blocks + 1);
    assert_eq!(after.separate_blocks, baseline.separate_blocks + 1);
    assert_eq!(after.blocks_created(), baseline.blocks_created() + 2);
}

#[test]
#[should_panic(expected = "empty Shared")]
fn empty_handle_panics_on_deref()
{
    let empty = Shared::<i32>::null();
    let _ = *empty;
}

#[test]
fn raw_adoption_round_trip()
{
    let baseline = thread_stats();
    let hits = probe_cell();

    let raw = Box::into_raw(Box::new(DropProbe(hits)));
    let adopted = unsafe { Shared::from_raw(raw) };

    assert!(!adopted.is_null());
    assert_eq!(adopted.strong_count(), 1);
    assert_eq!(thread_stats().separate_blocks, baseline.separate_blocks + 1);

    std::mem::drop(adopted);
    assert_eq!(hits.get(), 1);
    assert_eq!(thread_stats().live_blocks, baseline.live_blocks);

    // null adoption yields the empty handle and allocates nothing
    let empty = unsafe { Shared::<i32>::from_raw(std::ptr::null_mut()) };
    assert!(empty.is_null());
    assert_eq!(empty.strong_count(), 0);
    assert_eq!(thread_stats().blocks_created(), baseline.blocks_created() + 1);
}

#[test]
fn debug_renders_unsized_payloads()
{
    let s: Shared<str> = Shared::new(String::from("knot")).project(|v| v.as_str());
    assert_eq!(format!("{:?}", s), "Shared(\"knot\")");

    let w = s.downgrade();
    assert_eq!(format!("{:?}", w), "Weak(\"knot\")");

    std::mem::drop(s);
    assert_eq!(format!("{:?}", w), "Weak");
    assert_eq!(format!("{:?}", Shared::<str>::null()), "Shared");
}

#[test]
fn inline_payload_survives_handle_churn()
{
    let a = Shared::new(Cell::new(2));
    let b = a.clone();
    a.set(3);

    let w = b.downgrade();
    std::mem::drop(a);
    std::mem::drop(b);
    assert!(w.expired());

    let c = Shared::new(Cell::new(5));
    let w = c.downgrade();
    let locked = w.upgrade().unwrap();
    (*locked).set(6);
    assert_eq!((*c).get(), 6);
}

#[test]
fn projecting_an_empty_handle_stays_empty()
{
    let empty = Shared::<String>::null();
    let sub = empty.project(|s| s.as_str());
    assert!(sub.is_null());
    assert!(empty.downgrade().is_null());
}

#[cfg(feature = "global")]
#[test]
fn exited_threads_fold_into_global_ledger()
{
    let before = global_stats().blocks_created();

    std::thread::spawn(|| {
        for i in 0..10 {
            std::mem::drop(Shared::new(i));
        }
        std::mem::drop(Shared::from_box(Box::new(1u8)));
    })
    .join()
    .unwrap();

    assert!(global_stats().blocks_created() >= before + 11);
}
