//! The per-core reactor and its lifecycle.
//!
//! A reactor instance to CPU core is a one-to-one relation. Each reactor
//! owns two lockless rings: an event queue that any core may post to, and
//! a ring of active pollers that only the owning reactor touches. Pollers
//! are run round-robin; the reactor takes one poller from the head of the
//! ring, executes it, then puts it back at the tail.
//!
//! New pollers arrive through the event queue rather than by direct ring
//! access. This keeps the poller ring single producer, single consumer and
//! avoids atomic contention on the ring that every loop iteration
//! traverses.
//!
//! The loop itself busy-polls by design; the target workload dedicates an
//! entire core to each reactor and callbacks are expected to return
//! promptly. A blocked callback stalls both events and pollers on that
//! core.

use std::{
    ffi::CString,
    fmt::{self, Display, Formatter},
    slice::Iter,
    sync::atomic::{AtomicBool, AtomicU8, Ordering},
    thread,
};

use crossbeam::queue::ArrayQueue;
use once_cell::sync::OnceCell;

use super::{
    cpu_cores::{CoreMask, Cores},
    event::{self, EventHandle, EVENT_POOL_SIZE},
    poller::PollerHandle,
    IllegalLifecycle,
    MasterCoreMissing,
    Result,
};

/// capacity of the per-core event queue
pub const EVENT_QUEUE_SIZE: usize = 65_536;

/// capacity of the per-core poller ring; the number of pollers registered
/// on one core must stay below this
pub const POLLER_RING_SIZE: usize = 4_096;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ReactorState {
    Invalid = 0,
    Initialized = 1,
    Running = 2,
    Exiting = 3,
    Shutdown = 4,
}

impl Display for ReactorState {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        let s = match self {
            ReactorState::Invalid => "Invalid",
            ReactorState::Initialized => "Initialized",
            ReactorState::Running => "Running",
            ReactorState::Exiting => "Exiting",
            ReactorState::Shutdown => "Shutdown",
        };
        write!(f, "{}", s)
    }
}

impl ReactorState {
    fn from_u8(state: u8) -> Self {
        match state {
            0 => ReactorState::Invalid,
            1 => ReactorState::Initialized,
            2 => ReactorState::Running,
            3 => ReactorState::Exiting,
            4 => ReactorState::Shutdown,
            _ => panic!("invalid reactor state {}", state),
        }
    }
}

/// State shared by every worker; read at the end of each loop iteration,
/// written by the thread driving the lifecycle.
static REACTOR_STATE: AtomicU8 = AtomicU8::new(ReactorState::Invalid as u8);

/// the external timer subsystem, ticked once per loop iteration
static TIMER_TICK: OnceCell<fn()> = OnceCell::new();

pub static REACTOR_LIST: OnceCell<Reactors> = OnceCell::new();

/// the current state of the reactor subsystem
pub fn reactor_state() -> ReactorState {
    ReactorState::from_u8(REACTOR_STATE.load(Ordering::Acquire))
}

fn set_reactor_state(state: ReactorState) {
    REACTOR_STATE.store(state as u8, Ordering::Release);
}

/// Install the timer tick hook. The reactors call it once per loop
/// iteration, between draining events and advancing a poller.
pub fn set_timer_tick(tick: fn()) {
    if TIMER_TICK.set(tick).is_err() {
        warn!("timer tick hook already installed");
    }
}

#[derive(Debug)]
pub struct Reactors(Vec<Reactor>);

#[repr(C, align(64))]
#[derive(Debug)]
pub struct Reactor {
    /// the logical core this reactor is created on
    lcore: u32,
    /// events posted to this core; any core enqueues, only this reactor
    /// dequeues
    events: ArrayQueue<EventHandle>,
    /// pollers actively running on this reactor, round-robin; touched only
    /// by this reactor
    active_pollers: ArrayQueue<PollerHandle>,
    /// whether a worker currently occupies this reactor's core
    running: AtomicBool,
}

impl Reactors {
    /// get a reference to a ['Reactor'] associated with the given core.
    pub fn get_by_core(core: u32) -> Option<&'static Reactor> {
        Reactors::iter().find(|r| r.lcore == core)
    }

    /// get a reference to the reactor on the current core
    pub fn current() -> &'static Reactor {
        Self::get_by_core(Cores::current()).expect("no reactor allocated")
    }

    pub fn master() -> &'static Reactor {
        Self::get_by_core(Cores::master()).expect("no reactor allocated")
    }

    /// returns an iterator over all reactors
    pub fn iter() -> Iter<'static, Reactor> {
        REACTOR_LIST
            .get()
            .expect("reactors not initialized")
            .into_iter()
    }
}

impl<'a> IntoIterator for &'a Reactors {
    type Item = &'a Reactor;
    type IntoIter = ::std::slice::Iter<'a, Reactor>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl Reactor {
    /// create a new ['Reactor'] instance for the given core
    fn new(core: u32) -> Self {
        debug!("init core: {}", core);
        Self {
            lcore: core,
            events: ArrayQueue::new(EVENT_QUEUE_SIZE),
            active_pollers: ArrayQueue::new(POLLER_RING_SIZE),
            running: AtomicBool::new(false),
        }
    }

    /// returns core number of this reactor
    pub fn core(&self) -> u32 {
        self.lcore
    }

    /// number of events waiting in the queue of this reactor
    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    /// number of pollers in the ring of this reactor
    pub fn poller_count(&self) -> usize {
        self.active_pollers.len()
    }

    /// post an event to this reactor; called from any core
    pub(crate) fn send_event(&self, event: EventHandle) {
        if self.events.push(event).is_err() {
            panic!("event queue of reactor {} is full", self.lcore);
        }
    }

    /// put a poller at the tail of the ring; called on this reactor's core
    /// only
    pub(crate) fn enqueue_poller(&self, poller: PollerHandle) {
        if self.active_pollers.push(poller).is_err() {
            error!("poller could not be enqueued on core {}", self.lcore);
            panic!("poller ring of reactor {} is full", self.lcore);
        }
    }

    /// Walk the ring and drop the given poller, keeping every other entry.
    /// The walk dequeues exactly the length observed at the start, so
    /// entries arriving concurrently are not scanned, and re-enqueues
    /// survivors in order. Called on this reactor's core only.
    pub(crate) fn remove_poller(&self, target: PollerHandle) -> bool {
        let count = self.active_pollers.len();
        let mut found = false;

        for _ in 0 .. count {
            let poller = match self.active_pollers.pop() {
                Some(poller) => poller,
                None => break,
            };
            if poller == target {
                found = true;
                continue;
            }
            if self.active_pollers.push(poller).is_err() {
                error!("poller could not be enqueued on core {}", self.lcore);
                panic!("poller ring of reactor {} is full", self.lcore);
            }
        }

        found
    }

    /// Dequeue and run every event that was in the queue when this pass
    /// started. The length is sampled once so a burst of newly arriving
    /// events cannot extend the pass; they run in the next iteration.
    fn event_queue_run_all(&self) {
        let count = self.events.len();
        for _ in 0 .. count {
            let event = match self.events.pop() {
                Some(event) => event,
                None => break,
            };
            event::event_run(event);
        }
    }

    /// take one poller from the head of the ring, run it, put it back at
    /// the tail
    fn poll_poller_once(&self) {
        if let Some(poller) = self.active_pollers.pop() {
            poller.poll();
            if self.active_pollers.push(poller).is_err() {
                error!("poller could not be enqueued on core {}", self.lcore);
                panic!("poller ring of reactor {} is full", self.lcore);
            }
        }
    }

    /// a single iteration of the reactor: drain events, tick timers,
    /// advance one poller
    pub fn poll_once(&self) {
        self.event_queue_run_all();

        if let Some(tick) = TIMER_TICK.get() {
            tick();
        }

        self.poll_poller_once();
    }

    /// poll this reactor until the subsystem leaves the running state
    fn poll_reactor(&self) {
        info!("reactor {}: waiting for work to arrive", self.lcore);

        loop {
            self.poll_once();

            if reactor_state() != ReactorState::Running {
                break;
            }
        }

        debug!("reactor {} stopped polling", self.lcore);
    }

    /// The main function of a reactor worker. Runs on the reactor's core;
    /// records the core identity, labels and pins the thread, then loops.
    fn run(&self) {
        Cores::set_current(self.lcore);
        Cores::pin_current_thread(self.lcore);
        set_reactor_thread_name(self.lcore);

        debug!("start polling of reactor {}", self.lcore);
        self.poll_reactor();

        self.running.store(false, Ordering::Release);
    }
}

/// Set current reactor thread name to "reactor <cpu #>". This makes the
/// reactor threads distinguishable in top and gdb.
fn set_reactor_thread_name(core: u32) {
    let name = CString::new(format!("reactor {}", core))
        .expect("thread name is not a valid C string");
    unsafe {
        libc::prctl(libc::PR_SET_NAME, name.as_ptr());
    }
}

/// resolve and validate the mask the reactors will occupy
fn parse_reactor_mask(mask: Option<&str>) -> Result<CoreMask> {
    let mask = match mask {
        // no mask specified, occupy every core the host has online
        None => CoreMask::all_online(),
        Some(mask) => CoreMask::parse(mask)?,
    };

    if !mask.contains(Cores::master()) {
        error!(
            "master core {} must be set in core mask {}",
            Cores::master(),
            mask
        );
        return MasterCoreMissing {
            core: Cores::master(),
            mask: mask.bits(),
        }
        .fail();
    }

    Ok(mask)
}

/// Initialize the reactor subsystem: parse the mask, construct the queue
/// and poller ring of every occupied core and preallocate the event pool.
pub fn reactors_init(mask: Option<&str>) -> Result<()> {
    let state = reactor_state();
    if state != ReactorState::Invalid {
        error!("cannot initialize reactors in the {} state", state);
        return IllegalLifecycle { state }.fail();
    }

    let mask = parse_reactor_mask(mask)?;
    info!("occupied cpu core mask is {}", mask);

    Cores::set_mask(mask);
    REACTOR_LIST
        .get_or_init(|| Reactors(Cores::iter().map(Reactor::new).collect()));
    event::pool_init(EVENT_POOL_SIZE);

    set_reactor_state(ReactorState::Initialized);
    Ok(())
}

/// Start a worker for every occupied core and block until all of them have
/// exited. The calling thread becomes the master worker: it is pinned to
/// the master core and runs that reactor's loop in place. Slave workers
/// are joined before this returns.
pub fn reactors_start() -> Result<()> {
    let state = reactor_state();
    if state != ReactorState::Initialized {
        error!("cannot start reactors in the {} state", state);
        return IllegalLifecycle { state }.fail();
    }

    set_reactor_state(ReactorState::Running);

    let master = Reactors::master();
    let mut workers = Vec::new();

    for reactor in Reactors::iter() {
        if reactor.lcore == master.lcore {
            continue;
        }
        if reactor.running.swap(true, Ordering::AcqRel) {
            warn!("something already running on core {}", reactor.lcore);
            continue;
        }

        let worker = thread::Builder::new()
            .name(format!("reactor {}", reactor.lcore))
            .spawn(move || reactor.run())
            .expect("failed to launch reactor thread");
        workers.push(worker);
    }

    // the master core polls on the calling thread
    master.running.store(true, Ordering::Release);
    master.run();

    // wait for all other cores to exit before we unblock
    for worker in workers {
        worker.join().expect("reactor worker panicked");
    }

    set_reactor_state(ReactorState::Shutdown);
    info!("all reactors stopped");
    Ok(())
}

/// Request shutdown. Idempotent; every worker observes the state change at
/// the end of its current iteration. Events still queued at that point are
/// not guaranteed to run.
pub fn reactors_stop() {
    match reactor_state() {
        ReactorState::Running | ReactorState::Exiting => {
            info!("reactors stop requested");
            set_reactor_state(ReactorState::Exiting);
        }
        state => {
            warn!("reactors stop requested in the {} state", state);
        }
    }
}

/// Tear down the reactor subsystem. Events left behind in the per-core
/// queues are returned to the pool unexecuted; records still borrowed
/// elsewhere are reported. The backing memory of the pool and the rings
/// lives for the rest of the process.
pub fn reactors_fini() -> Result<()> {
    let state = reactor_state();
    match state {
        ReactorState::Shutdown | ReactorState::Initialized => {}
        state => {
            error!("cannot tear down reactors in the {} state", state);
            return IllegalLifecycle { state }.fail();
        }
    }

    for reactor in Reactors::iter() {
        while let Some(event) = reactor.events.pop() {
            event::event_free(event);
        }
    }

    let free = event::event_pool_count();
    if free != EVENT_POOL_SIZE {
        warn!(
            "event pool placement (t/u/f): {}/{}/{}",
            EVENT_POOL_SIZE,
            EVENT_POOL_SIZE - free,
            free
        );
    }

    Ok(())
}

/// number of cores the reactors occupy
pub fn get_core_count() -> u32 {
    Cores::count()
}

/// the configured core mask
pub fn get_core_mask() -> u64 {
    Cores::mask().bits()
}
