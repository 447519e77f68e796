//! A mask holding only the master bit runs the whole subsystem on the
//! calling thread: registration, a bounded number of poller ticks and the
//! shutdown all happen in place.

use std::sync::atomic::{AtomicUsize, Ordering};

use io_reactor::core::{
    get_core_count,
    get_core_mask,
    poller,
    poller_register,
    reactor_state,
    reactors_fini,
    reactors_init,
    reactors_start,
    reactors_stop,
    ReactorState,
};

pub mod common;

const ROUNDS: usize = 10;

static TICKS: AtomicUsize = AtomicUsize::new(0);
static TIMER_TICKS: AtomicUsize = AtomicUsize::new(0);

fn count_timer_tick() {
    TIMER_TICKS.fetch_add(1, Ordering::SeqCst);
}

#[test]
fn master_only_mask() {
    common::test_init();
    reactors_init(Some("0x1")).unwrap();

    assert_eq!(get_core_count(), 1);
    assert_eq!(get_core_mask(), 0x1);

    io_reactor::core::set_timer_tick(count_timer_tick);

    let poller = poller::Builder::new()
        .with_name("ticker")
        .with_poll_fn(|| {
            if TICKS.fetch_add(1, Ordering::SeqCst) + 1 == ROUNDS {
                // stop is idempotent, a second request changes nothing
                reactors_stop();
                reactors_stop();
            }
        })
        .build();
    poller_register(poller, 0, None);

    reactors_start().unwrap();

    assert_eq!(reactor_state(), ReactorState::Shutdown);
    assert_eq!(TICKS.load(Ordering::SeqCst), ROUNDS);
    // the timer ticks on every iteration, poller or not
    assert!(TIMER_TICKS.load(Ordering::SeqCst) >= ROUNDS);

    // starting again once shut down is refused
    assert!(reactors_start().is_err());

    reactors_fini().unwrap();
}
