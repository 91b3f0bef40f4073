//! Runtime with scheduling threads and timer to serve spawned tasks.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::mem;
use std::num::NonZeroUsize;
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

use hashbrown::HashMap;
use ignore_result::Ignore;

use crate::error::JoinError;
use crate::scope::{self, Scope};
use crate::task::mpsc::{self, Sender};
use crate::task::{self, SchedFlow, Task};
use crate::time;

thread_local! {
    static SCHEDULER: RefCell<Option<Arc<Scheduler>>> = const { RefCell::new(None) };
}

struct ThreadScope {}

impl ThreadScope {
    fn enter(scheduler: &Arc<Scheduler>) -> ThreadScope {
        SCHEDULER.with(|cell| {
            let mut current = cell.borrow_mut();
            assert!(current.is_none(), "runtime scheduler existed");
            *current = Some(scheduler.clone());
        });
        ThreadScope {}
    }
}

impl Drop for ThreadScope {
    fn drop(&mut self) {
        SCHEDULER.with(|cell| {
            let scheduler = cell.borrow_mut().take();
            assert!(scheduler.is_some(), "runtime scheduler does not exist");
        });
    }
}

/// Builder for [Runtime].
#[derive(Default, Debug, Clone)]
pub struct Builder {
    parallelism: Option<usize>,
}

impl Builder {
    /// Specifies the number of parallel threads for scheduling.
    pub fn parallelism(&mut self, n: usize) -> &mut Self {
        assert!(n > 0, "parallelism must not be zero");
        self.parallelism = Some(n);
        self
    }

    /// Constructs an [Runtime] to spawn and schedule tasks.
    pub fn build(&mut self) -> Runtime {
        let parallelism = self
            .parallelism
            .unwrap_or_else(|| thread::available_parallelism().map(NonZeroUsize::get).unwrap_or(4));
        let (time_sender, time_receiver) = mpsc::unbounded(512);
        let scheduler = Scheduler::new(time_sender.clone());
        let scheduling_threads = Scheduler::start(&scheduler, parallelism);
        let timer = task::Builder::with_scheduler(&scheduler).spawn(move || time::timer(time_receiver));
        let ticker = thread::Builder::new()
            .name("launchpad-ticker".to_string())
            .spawn(move || time::tick(time_sender))
            .expect("failed to spawn ticker thread");
        tracing::debug!(parallelism, "runtime started");
        Runtime { scheduler, timer: Some(timer), ticker: Some(ticker), scheduling_threads }
    }

    /// Runs `f` within a [Scope] in a fresh runtime and waits for it and every task it launched.
    ///
    /// See [scope::scope] for how failures surface.
    pub fn run_blocking<F, T>(&mut self, f: F) -> Result<T, JoinError>
    where
        F: FnOnce(&Scope) -> T,
        F: Send + 'static,
        T: Send + 'static,
    {
        let runtime = self.build();
        runtime.block_on(move || scope::scope(f)).and_then(|result| result)
    }
}

/// Runtime encapsulates timer and task scheduler to serve spawned tasks.
///
/// Dropping it stops timer and all scheduling threads. Tasks still delaying at that time fail
/// with "runtime stopped", tasks blocking on anything else are abandoned.
pub struct Runtime {
    scheduler: Arc<Scheduler>,
    timer: Option<task::JoinHandle<()>>,
    ticker: Option<thread::JoinHandle<()>>,
    scheduling_threads: Vec<thread::JoinHandle<()>>,
}

impl Runtime {
    /// Constructs an runtime to serve spawned tasks.
    pub fn new() -> Runtime {
        Builder::default().build()
    }

    /// Constructs a task builder to spawn task.
    pub fn builder(&self) -> task::Builder<'_> {
        task::Builder::with_scheduler(&self.scheduler)
    }

    /// Spawns a concurrent task and returns a [task::JoinHandle] for it.
    ///
    /// See [task::spawn] for more details
    pub fn spawn<F, T>(&self, f: F) -> task::JoinHandle<T>
    where
        F: FnOnce() -> T,
        F: Send + 'static,
        T: Send + 'static,
    {
        task::Builder::with_scheduler(&self.scheduler).spawn(f)
    }

    /// Spawns `f` as a task and blocks calling thread until it finishes.
    pub fn block_on<F, T>(&self, f: F) -> Result<T, JoinError>
    where
        F: FnOnce() -> T,
        F: Send + 'static,
        T: Send + 'static,
    {
        self.spawn(f).join()
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Runtime::new()
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.scheduler.timer().send(time::Message::Stop).ignore();
        if let Some(timer) = self.timer.take() {
            timer.join().ignore();
        }
        if let Some(ticker) = self.ticker.take() {
            ticker.join().ignore();
        }
        self.scheduler.stop();
        for handle in self.scheduling_threads.drain(..) {
            handle.join().ignore();
        }
        let abandoned = self.scheduler.clear();
        tracing::debug!(abandoned, "runtime stopped");
    }
}

/// Runs `f` within a [Scope] in a fresh default runtime.
///
/// This is the blocking entry point: it returns only after `f` and every task launched through
/// the scope have terminated.
pub fn run_blocking<F, T>(f: F) -> Result<T, JoinError>
where
    F: FnOnce(&Scope) -> T,
    F: Send + 'static,
    T: Send + 'static,
{
    Builder::default().run_blocking(f)
}

#[derive(Default)]
struct SchedulerState {
    runq: VecDeque<Arc<Task>>,
    registry: HashMap<u64, Arc<Task>>,
    stopped: bool,
}

pub(crate) struct Scheduler {
    timer: Sender<time::Message>,
    state: Mutex<SchedulerState>,
    waker: Condvar,
}

impl Scheduler {
    fn new(timer: Sender<time::Message>) -> Arc<Scheduler> {
        Arc::new(Scheduler { timer, state: Mutex::new(SchedulerState::default()), waker: Condvar::new() })
    }

    /// Starts threads to serve spawned tasks.
    fn start(self: &Arc<Scheduler>, parallelism: usize) -> Vec<thread::JoinHandle<()>> {
        (0..parallelism)
            .map(|i| {
                let scheduler = self.clone();
                thread::Builder::new()
                    .name(format!("launchpad-worker-{}", i))
                    .spawn(move || scheduler.serve())
                    .expect("failed to spawn scheduling thread")
            })
            .collect()
    }

    /// Stops scheduling threads once run queue drained.
    fn stop(&self) {
        let mut state = self.state.lock().unwrap();
        state.stopped = true;
        self.waker.notify_all();
    }

    /// Drops tasks which never finished. Returns number of them.
    fn clear(&self) -> usize {
        let mut state = self.state.lock().unwrap();
        state.runq.clear();
        let registry = mem::take(&mut state.registry);
        drop(state);
        registry.len()
    }

    pub(crate) fn try_current() -> Option<Arc<Scheduler>> {
        SCHEDULER.with(|cell| cell.borrow().clone())
    }

    pub(crate) fn timer(&self) -> Sender<time::Message> {
        self.timer.clone()
    }

    pub(crate) fn sched(&self, task: Arc<Task>) {
        let mut state = self.state.lock().unwrap();
        state.registry.insert(task.id(), task.clone());
        state.runq.push_back(task);
        self.waker.notify_one();
    }

    pub(crate) fn resume(&self, task: Arc<Task>) {
        let mut state = self.state.lock().unwrap();
        state.runq.push_back(task);
        self.waker.notify_one();
    }

    fn serve(self: Arc<Scheduler>) {
        let _scope = ThreadScope::enter(&self);
        let mut state = self.state.lock().unwrap();
        loop {
            if let Some(task) = state.runq.pop_front() {
                drop(state);
                let flow = task.sched();
                state = self.state.lock().unwrap();
                match flow {
                    SchedFlow::Yield => state.runq.push_back(task),
                    SchedFlow::Block => {},
                    SchedFlow::Cease => {
                        state.registry.remove(&task.id());
                        tracing::trace!(task = task.id(), "task ceased");
                    },
                }
            } else if state.stopped {
                break;
            } else {
                state = self.waker.wait(state).unwrap();
            }
        }
    }
}
