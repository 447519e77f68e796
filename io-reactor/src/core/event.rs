//! One-shot work items cross-posted between cores.
//!
//! Events are simple function pointer plus argument records. They are
//! preallocated from a global pool sized at init time; allocation on the
//! hot path only pops the lockless free list. The reactor that runs the
//! callback returns the record to the pool immediately after the callback
//! returns, so a callback must never free its own event.
//!
//! An event may carry a `next` event, posted by whoever consumes the first
//! one. The control operations use this to chain completions behind state
//! changes.

use std::{os::raw::c_void, ptr::NonNull};

use once_cell::sync::OnceCell;

use super::{mempool::MemoryPool, reactor::Reactors};

/// number of event records preallocated at init time. In-flight events
/// across all cores can never exceed this; running out is a sizing bug and
/// aborts.
pub const EVENT_POOL_SIZE: u64 = 262_144;

/// event callbacks receive the full record so they can read the arguments
/// and the chained next event
pub type EventFn = fn(&Event);

static EVENT_POOL: OnceCell<MemoryPool<Event>> = OnceCell::new();

pub struct Event {
    /// the core this event will run on
    lcore: u32,
    callback: EventFn,
    arg1: *mut c_void,
    arg2: *mut c_void,
    /// posted after the callback has run, if set
    next: Option<EventHandle>,
}

// the arg pointers are opaque payload handed back to the callback on the
// target core; ownership transfer is the caller's responsibility, same as
// for `EventHandle` below.
unsafe impl Send for Event {}

impl Event {
    pub fn lcore(&self) -> u32 {
        self.lcore
    }

    pub fn arg1(&self) -> *mut c_void {
        self.arg1
    }

    pub fn arg2(&self) -> *mut c_void {
        self.arg2
    }

    pub fn next(&self) -> Option<EventHandle> {
        self.next
    }
}

/// Copyable reference to a pooled event record. Valid from allocation until
/// the reactor that ran the callback returns the record to the pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EventHandle(NonNull<Event>);

unsafe impl Send for EventHandle {}
unsafe impl Sync for EventHandle {}

impl EventHandle {
    pub(crate) fn as_ptr(self) -> *mut Event {
        self.0.as_ptr()
    }

    /// access the record. The caller must be the current exclusive holder,
    /// either the producer before the call or the owning reactor after the
    /// dequeue.
    pub(crate) unsafe fn event(&self) -> &Event {
        self.0.as_ref()
    }
}

pub(crate) fn pool_init(size: u64) {
    EVENT_POOL.get_or_init(|| {
        MemoryPool::create("event_pool", size)
            .expect("event pool allocation failed")
    });
}

fn pool() -> &'static MemoryPool<Event> {
    EVENT_POOL.get().expect("event pool not initialized")
}

/// number of event records currently inside the pool
pub fn event_pool_count() -> u64 {
    pool().free_count()
}

/// Take a record from the event pool and fill it in. The pool being empty
/// means the deployment sized it too small; that is fatal.
pub fn event_allocate(
    lcore: u32,
    callback: EventFn,
    arg1: *mut c_void,
    arg2: *mut c_void,
    next: Option<EventHandle>,
) -> EventHandle {
    let event = Event {
        lcore,
        callback,
        arg1,
        arg2,
        next,
    };

    let ptr = pool().get(event).expect("event pool exhausted");
    EventHandle(NonNull::new(ptr).expect("event pool returned a null record"))
}

/// Post the event to the queue of its target core. The queue primitive is
/// fallible but a full queue reflects a sizing bug, so failure here is
/// fatal rather than surfaced to the caller.
pub fn event_call(event: EventHandle) {
    let lcore = unsafe { event.event() }.lcore;
    let reactor = Reactors::get_by_core(lcore)
        .unwrap_or_else(|| panic!("no reactor allocated on core {}", lcore));
    reactor.send_event(event);
}

/// run the callback, then return the record to the pool. Only the owning
/// reactor calls this, once per dequeued event.
pub(crate) fn event_run(event: EventHandle) {
    let record = unsafe { event.event() };
    (record.callback)(record);
    event_free(event);
}

pub(crate) fn event_free(event: EventHandle) {
    pool().put(event.as_ptr());
}
