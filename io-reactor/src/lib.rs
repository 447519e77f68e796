//! Per-core event reactor for the I/O performance framework.
//!
//! One reactor is pinned to each core named in the configured core mask.
//! Work arrives in two shapes: one-shot events, cross-posted from any core
//! through a lockless queue, and long-lived pollers that the owning reactor
//! invokes round-robin, one per loop iteration.
//!
//! The event records themselves are preallocated from a global pool, so the
//! hot path performs no allocations. The poller ring of a core is only ever
//! touched by the reactor that owns it; register, unregister and migrate
//! requests from other cores are marshalled through events targeted at the
//! owning reactor. This keeps the ring single producer, single consumer and
//! free of atomic contention.

#[macro_use]
extern crate log;

pub mod core;
pub mod logger;
