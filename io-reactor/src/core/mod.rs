//!
//! core contains the primary abstractions around the reactor primitives.

use snafu::Snafu;

pub mod cpu_cores;
pub mod event;
pub mod mempool;
pub mod poller;
pub mod reactor;

pub use cpu_cores::{parse_core_mask, CoreMask, Cores, INVALID_CORE};
pub use event::{
    event_allocate,
    event_call,
    event_pool_count,
    Event,
    EventFn,
    EventHandle,
    EVENT_POOL_SIZE,
};
pub use mempool::MemoryPool;
pub use poller::{
    poller_migrate,
    poller_register,
    poller_unregister,
    Poller,
    PollerHandle,
};
pub use reactor::{
    get_core_count,
    get_core_mask,
    reactor_state,
    reactors_fini,
    reactors_init,
    reactors_start,
    reactors_stop,
    set_timer_tick,
    Reactor,
    ReactorState,
    Reactors,
    REACTOR_LIST,
    EVENT_QUEUE_SIZE,
    POLLER_RING_SIZE,
};

#[derive(Debug, Snafu)]
#[snafu(visibility = "pub(crate)")]
pub enum CoreError {
    #[snafu(display("invalid core mask '{}': {}", mask, reason))]
    InvalidMask { mask: String, reason: String },
    #[snafu(display(
        "master core {} must be set in core mask 0x{:x}",
        core,
        mask
    ))]
    MasterCoreMissing { core: u32, mask: u64 },
    #[snafu(display(
        "operation not permitted while reactors are in the {} state",
        state
    ))]
    IllegalLifecycle { state: ReactorState },
}

pub type Result<T, E = CoreError> = std::result::Result<T, E>;
