//! Unregistering a poller drops it from the ring without disturbing the
//! relative order of the survivors.

use std::{
    ptr::null_mut,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
};

use once_cell::sync::{Lazy, OnceCell};

use io_reactor::core::{
    event_allocate,
    event_call,
    poller,
    poller_register,
    poller_unregister,
    reactors_init,
    reactors_start,
    reactors_stop,
    Event,
    PollerHandle,
};

pub mod common;

const ROUNDS: usize = 4;

static LOG: Lazy<Mutex<Vec<&'static str>>> =
    Lazy::new(|| Mutex::new(Vec::new()));
static B: OnceCell<PollerHandle> = OnceCell::new();
static D_TICKS: AtomicUsize = AtomicUsize::new(0);

fn named_poller(name: &'static str) -> PollerHandle {
    poller::Builder::new()
        .with_name(name)
        .with_poll_fn(move || LOG.lock().unwrap().push(name))
        .build()
}

/// runs on core 0 after all four pollers are in the ring
fn drop_b(_event: &Event) {
    poller_unregister(*B.get().unwrap(), None);
}

#[test]
fn unregister_preserves_ring_order() {
    common::test_init();
    reactors_init(Some("0x1")).unwrap();

    let a = named_poller("a");
    let b = named_poller("b");
    let c = named_poller("c");
    // the tail poller drives the shutdown
    let d = poller::Builder::new()
        .with_name("d")
        .with_poll_fn(|| {
            LOG.lock().unwrap().push("d");
            if D_TICKS.fetch_add(1, Ordering::SeqCst) + 1 == ROUNDS {
                reactors_stop();
            }
        })
        .build();
    B.set(b).ok();

    // the four registers drain in the first pass, in posting order, so the
    // ring reads (a, b, c, d) before the first advance runs a. The removal
    // lands one iteration later, before b was ever polled, leaving the
    // rotation at (c, d, a)
    poller_register(a, 0, None);
    poller_register(b, 0, None);
    poller_register(c, 0, None);
    poller_register(d, 0, None);
    let unregister = event_allocate(0, drop_b, null_mut(), null_mut(), None);
    event_call(unregister);

    reactors_start().unwrap();

    let log = LOG.lock().unwrap();
    assert_eq!(log.len(), 3 * ROUNDS);
    for (index, name) in log.iter().enumerate() {
        assert_eq!(*name, ["a", "c", "d"][index % 3]);
    }

    assert_eq!(a.core(), Some(0));
    assert_eq!(b.core(), None);
    assert_eq!(c.core(), Some(0));
    assert_eq!(d.core(), Some(0));

    // b is in no ring, so the caller may reclaim it
    b.destroy();
}
