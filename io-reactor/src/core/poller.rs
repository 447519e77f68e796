//! Long-lived cooperative tasks invoked round-robin by the reactor that
//! owns them.
//!
//! A poller lives in exactly one core's ring, or in none at all. The ring
//! is never touched from another core: register, unregister and migrate are
//! encoded as events targeted at the reactor that owns (or will own) the
//! ring, and the actual mutation happens on that core. Each operation can
//! carry a completion event which is posted after the change is visible on
//! the target core.

use std::{
    fmt,
    os::raw::c_void,
    ptr::{null_mut, NonNull},
    sync::atomic::{AtomicU32, Ordering},
};

use super::{
    cpu_cores::{Cores, INVALID_CORE},
    event::{event_allocate, event_call, Event, EventHandle},
    reactor::{Reactor, Reactors},
};

/// structure holding our poll function and its owning core
pub struct Poller {
    name: String,
    /// the core whose ring currently holds this poller, INVALID_CORE while
    /// unregistered. Written by the owning core, read from anywhere.
    lcore: AtomicU32,
    poll_fn: Box<dyn FnMut() + Send + 'static>,
}

impl fmt::Debug for Poller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Poller")
            .field("name", &self.name)
            .field("lcore", &self.lcore.load(Ordering::Relaxed))
            .finish()
    }
}

/// Copyable reference to a poller; this is what the rings carry. The
/// allocation behind it lives until [`PollerHandle::destroy`].
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PollerHandle(NonNull<Poller>);

unsafe impl Send for PollerHandle {}
unsafe impl Sync for PollerHandle {}

impl fmt::Debug for PollerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = unsafe { &(*self.0.as_ptr()).name };
        f.debug_struct("Poller")
            .field("name", name)
            .field("lcore", &self.lcore_atomic().load(Ordering::Relaxed))
            .finish()
    }
}

impl PollerHandle {
    pub(crate) fn from_raw(ptr: *mut Poller) -> Self {
        PollerHandle(NonNull::new(ptr).expect("null poller"))
    }

    pub(crate) fn as_ptr(self) -> *mut Poller {
        self.0.as_ptr()
    }

    /// the owning core tag; projected so readers never alias the poll
    /// function the owning core may be running
    fn lcore_atomic(&self) -> &AtomicU32 {
        unsafe { &(*self.0.as_ptr()).lcore }
    }

    /// the core whose ring currently holds this poller
    pub fn core(&self) -> Option<u32> {
        let lcore = self.lcore_atomic().load(Ordering::Acquire);
        if lcore == INVALID_CORE {
            None
        } else {
            Some(lcore)
        }
    }

    pub(crate) fn set_core(&self, lcore: u32) {
        self.lcore_atomic().store(lcore, Ordering::Release);
    }

    /// invoke the poll function. Only the reactor whose ring holds the
    /// poller may call this; the ring discipline makes the access exclusive.
    pub(crate) fn poll(&self) {
        let poll_fn = unsafe { &mut (*self.0.as_ptr()).poll_fn };
        (poll_fn)();
    }

    /// Reclaim the allocation behind the handle. The poller must not be
    /// registered anywhere; destroying a registered poller would leave a
    /// dangling entry in a ring and is a caller bug.
    pub fn destroy(self) {
        let lcore = self.lcore_atomic().load(Ordering::Acquire);
        assert_eq!(
            lcore, INVALID_CORE,
            "poller destroyed while still registered on core {}",
            lcore
        );
        unsafe { drop(Box::from_raw(self.0.as_ptr())) };
    }
}

/// builder type to create a new poller
pub struct Builder {
    name: Option<String>,
    poll_fn: Option<Box<dyn FnMut() + Send + 'static>>,
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

impl Builder {
    pub fn new() -> Self {
        Self {
            name: None,
            poll_fn: None,
        }
    }

    /// create the poller with a given name
    pub fn with_name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = Some(name.into());
        self
    }

    /// set the function for this poller. It runs on the core the poller is
    /// registered on and must not block.
    pub fn with_poll_fn(
        mut self,
        poll_fn: impl FnMut() + Send + 'static,
    ) -> Self {
        self.poll_fn = Some(Box::new(poll_fn));
        self
    }

    /// build a new poller object. It is not attached to any core until it
    /// is registered.
    pub fn build(mut self) -> PollerHandle {
        let poll_fn = self
            .poll_fn
            .take()
            .expect("can not build a poller without a poll function");

        let poller = Box::new(Poller {
            name: self.name.unwrap_or_else(|| "<unnamed>".to_string()),
            lcore: AtomicU32::new(INVALID_CORE),
            poll_fn,
        });

        PollerHandle::from_raw(Box::into_raw(poller))
    }
}

/// runs on the core that will own the poller
fn on_add_poller(event: &Event) {
    let reactor = unsafe { &*(event.arg1() as *const Reactor) };
    let poller = PollerHandle::from_raw(event.arg2() as *mut Poller);

    poller.set_core(reactor.core());
    reactor.enqueue_poller(poller);

    if let Some(next) = event.next() {
        event_call(next);
    }
}

/// Hand the poller to the reactor on the given core. The ring mutation
/// happens on that core; `complete` is posted once the poller is in the
/// ring.
pub fn poller_register(
    poller: PollerHandle,
    lcore: u32,
    complete: Option<EventHandle>,
) {
    let reactor = Reactors::get_by_core(lcore)
        .unwrap_or_else(|| panic!("no reactor allocated on core {}", lcore));

    let event = event_allocate(
        lcore,
        on_add_poller,
        reactor as *const Reactor as *mut c_void,
        poller.as_ptr() as *mut c_void,
        complete,
    );
    event_call(event);
}

/// runs on the core that owns the poller
fn on_remove_poller(event: &Event) {
    let reactor = unsafe { &*(event.arg1() as *const Reactor) };
    let poller = PollerHandle::from_raw(event.arg2() as *mut Poller);

    if reactor.remove_poller(poller) {
        poller.set_core(INVALID_CORE);
    } else {
        warn!(
            "poller {:?} was not in the ring of core {}",
            poller,
            reactor.core()
        );
    }

    if let Some(next) = event.next() {
        event_call(next);
    }
}

/// Take the poller back from the reactor that owns it. `complete` is posted
/// once the poller is in no ring; relative order of the surviving pollers
/// is preserved.
pub fn poller_unregister(poller: PollerHandle, complete: Option<EventHandle>) {
    let lcore = poller.core().expect("poller is not registered");
    let reactor = Reactors::get_by_core(lcore)
        .unwrap_or_else(|| panic!("no reactor allocated on core {}", lcore));

    let event = event_allocate(
        lcore,
        on_remove_poller,
        reactor as *const Reactor as *mut c_void,
        poller.as_ptr() as *mut c_void,
        complete,
    );
    event_call(event);
}

/// runs on the core the poller migrates to, after the unregister on the old
/// core has completed
fn on_migrate(event: &Event) {
    let poller = PollerHandle::from_raw(event.arg1() as *mut Poller);

    // register on the current core; the event was allocated against the
    // new core so this is the core the caller asked for
    poller_register(poller, Cores::current(), event.next());
}

/// Move the poller to another core. Composed from unregister on the old
/// core chained into register on the new one; in between the poller is in
/// no ring. `complete` is posted after the poller is in the new ring.
pub fn poller_migrate(
    poller: PollerHandle,
    new_lcore: u32,
    complete: Option<EventHandle>,
) {
    assert!(
        Cores::mask().contains(new_lcore),
        "core {} is not part of the reactor mask",
        new_lcore
    );

    let event = event_allocate(
        new_lcore,
        on_migrate,
        poller.as_ptr() as *mut c_void,
        null_mut(),
        complete,
    );

    poller_unregister(poller, Some(event));
}
