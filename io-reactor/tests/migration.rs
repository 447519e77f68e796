//! Migrating a poller moves it from the ring of one core to the ring of
//! another, with the completion firing only after the new placement is
//! visible on the target core.
//!
//! This test requires the system to have at least 2 cpus.

use std::{
    ptr::null_mut,
    sync::atomic::{AtomicU32, AtomicUsize, Ordering},
};

use once_cell::sync::OnceCell;

use io_reactor::core::{
    event_allocate,
    poller,
    poller_migrate,
    poller_register,
    reactors_init,
    reactors_start,
    reactors_stop,
    Cores,
    Event,
    PollerHandle,
    Reactors,
    INVALID_CORE,
};

pub mod common;

static POLLER: OnceCell<PollerHandle> = OnceCell::new();
static POLLS_ON_0: AtomicUsize = AtomicUsize::new(0);
static POLLS_ON_1: AtomicUsize = AtomicUsize::new(0);
static CORE_AFTER: AtomicU32 = AtomicU32::new(INVALID_CORE);
static RING_0_AFTER: AtomicUsize = AtomicUsize::new(usize::MAX);
static RING_1_AFTER: AtomicUsize = AtomicUsize::new(usize::MAX);
static DONE: AtomicUsize = AtomicUsize::new(0);

/// completion of the initial register; the poller sits in the ring of core
/// 0 when this runs
fn start_migration(_event: &Event) {
    let poller = *POLLER.get().unwrap();
    let done = event_allocate(1, on_migrated, null_mut(), null_mut(), None);
    poller_migrate(poller, 1, Some(done));
}

/// runs on core 1 once the poller is in this core's ring
fn on_migrated(_event: &Event) {
    let poller = POLLER.get().unwrap();

    CORE_AFTER.store(
        poller.core().unwrap_or(INVALID_CORE),
        Ordering::SeqCst,
    );
    // this is core 1's thread, so its own ring is stable here; core 0 no
    // longer holds anything so its count is stable as well
    RING_0_AFTER.store(
        Reactors::get_by_core(0).unwrap().poller_count(),
        Ordering::SeqCst,
    );
    RING_1_AFTER.store(
        Reactors::get_by_core(1).unwrap().poller_count(),
        Ordering::SeqCst,
    );
    DONE.fetch_add(1, Ordering::SeqCst);

    reactors_stop();
}

#[test]
fn poller_migrates_between_cores() {
    common::test_init();

    if Cores::online() < 2 {
        // nothing to migrate to on this host
        return;
    }

    reactors_init(Some("0x3")).unwrap();

    let poller = poller::Builder::new()
        .with_name("roaming")
        .with_poll_fn(|| match Cores::current() {
            0 => {
                POLLS_ON_0.fetch_add(1, Ordering::SeqCst);
            }
            1 => {
                POLLS_ON_1.fetch_add(1, Ordering::SeqCst);
            }
            core => panic!("polled on unexpected core {}", core),
        })
        .build();
    POLLER.set(poller).ok();

    let trigger =
        event_allocate(0, start_migration, null_mut(), null_mut(), None);
    poller_register(poller, 0, Some(trigger));

    reactors_start().unwrap();

    assert_eq!(DONE.load(Ordering::SeqCst), 1);
    assert_eq!(CORE_AFTER.load(Ordering::SeqCst), 1);
    assert_eq!(RING_0_AFTER.load(Ordering::SeqCst), 0);
    assert_eq!(RING_1_AFTER.load(Ordering::SeqCst), 1);

    // it ran on the old core before the move and on the new core after
    assert!(POLLS_ON_0.load(Ordering::SeqCst) >= 1);
    assert!(POLLS_ON_1.load(Ordering::SeqCst) >= 1);
    assert_eq!(poller.core(), Some(1));
}
