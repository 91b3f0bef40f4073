//! Concurrent tasks: launch, yield and join.

use std::cell::{Cell, UnsafeCell};
use std::panic::{self, AssertUnwindSafe};
use std::ptr;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, Weak};

use derive_where::derive_where;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use static_assertions::assert_impl_all;

pub use self::session::{session, Session, SessionWaker};
use crate::coroutine::stack::StackSize;
use crate::coroutine::{Coroutine, Status};
use crate::error::{JoinError, PanicError};
use crate::runtime::Scheduler;

pub mod mpsc;
mod session;

static TID_COUNTER: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static TASK: Cell<Option<ptr::NonNull<Task>>> = const { Cell::new(None) };
}

/// Returns running task of calling thread if any.
pub(crate) fn task<'a>() -> Option<&'a Task> {
    TASK.with(|cell| cell.get()).map(|task| unsafe { task.as_ref() })
}

pub(crate) fn current<'a>() -> &'a Task {
    task().expect("no running task")
}

struct Scope {
    task: ptr::NonNull<Task>,
}

impl Scope {
    fn enter(task: &Task) -> Self {
        TASK.with(|cell| {
            assert!(cell.get().is_none(), "running task not exited");
            cell.set(Some(ptr::NonNull::from(task)));
        });
        Scope { task: ptr::NonNull::from(task) }
    }
}

impl Drop for Scope {
    fn drop(&mut self) {
        TASK.with(|cell| {
            let task = cell.replace(None).expect("no running task");
            assert!(self.task == task, "running task changed");
        });
    }
}

/// Lifecycle of a task as observed through its [JoinHandle].
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, IntoPrimitive, TryFromPrimitive, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum TaskState {
    /// Spawned but not run yet.
    Pending,
    Running,
    /// Blocked in [crate::time::delay], join or other session.
    Suspended,
    Completed,
    /// Body panicked or runtime gave it up.
    Failed,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed)
    }
}

#[derive(Debug)]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    fn new() -> Arc<StateCell> {
        Arc::new(StateCell(AtomicU8::new(TaskState::Pending.into())))
    }

    fn get(&self) -> TaskState {
        TaskState::try_from_primitive(self.0.load(Ordering::Acquire)).expect("invalid task state")
    }

    fn set(&self, state: TaskState) {
        self.0.store(state.into(), Ordering::Release);
    }
}

pub(crate) type FnMain = Box<dyn FnOnce()>;

/// Builder for concurrent task.
#[derive(Default)]
pub struct Builder<'a> {
    stack_size: StackSize,
    scheduler: Option<&'a Arc<Scheduler>>,
}

assert_impl_all!(Builder<'static>: Send);

impl Builder<'_> {
    /// Constructs a new task builder.
    pub fn new() -> Builder<'static> {
        Builder { stack_size: StackSize::default(), scheduler: None }
    }

    pub(crate) fn with_scheduler(scheduler: &Arc<Scheduler>) -> Builder<'_> {
        Builder { stack_size: StackSize::default(), scheduler: Some(scheduler) }
    }

    /// Specifies stack size for new task.
    pub fn stack_size(&mut self, stack_size: StackSize) -> &mut Self {
        self.stack_size = stack_size;
        self
    }

    /// Spawns a concurrent task and returns a [JoinHandle] for it.
    ///
    /// See [spawn] for more details
    pub fn spawn<F, T>(&mut self, f: F) -> JoinHandle<T>
    where
        F: FnOnce() -> T,
        F: Send + 'static,
        T: Send + 'static,
    {
        let scheduler = self.scheduler.cloned().or_else(Scheduler::try_current).expect("no runtime");
        let (session, waker) = session();
        let state = StateCell::new();
        let main: FnMain = Box::new({
            let state = state.clone();
            move || {
                let result = panic::catch_unwind(AssertUnwindSafe(f));
                state.set(if result.is_ok() { TaskState::Completed } else { TaskState::Failed });
                waker.set_result(result.map_err(PanicError::Unwind));
            }
        });
        let task = Task::new(main, self.stack_size, &scheduler, state.clone());
        let id = task.id();
        tracing::trace!(task = id, "task spawned");
        scheduler.sched(task);
        JoinHandle { id, state, session }
    }
}

/// JoinHandle provides method to retrieve result of associated concurrent task.
///
/// Dropping it detaches the task: the task keeps running, its result or failure is discarded.
#[derive_where(Debug)]
pub struct JoinHandle<T: Send + 'static> {
    id: u64,
    state: Arc<StateCell>,
    #[derive_where(skip)]
    session: Session<T>,
}

unsafe impl<T: Send + 'static> Send for JoinHandle<T> {}

assert_impl_all!(JoinHandle<()>: Send);

impl<T: Send + 'static> JoinHandle<T> {
    /// Unique id of associated task.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Current lifecycle state of associated task.
    pub fn state(&self) -> TaskState {
        self.state.get()
    }

    /// Checks whether associated task has completed or failed.
    pub fn is_finished(&self) -> bool {
        self.session.is_ready()
    }

    /// Waits for associated task to finish and returns its result.
    ///
    /// Calling task is suspended while waiting, plain thread is parked. Panic of the task
    /// surfaces here as [JoinError].
    pub fn join(self) -> Result<T, JoinError> {
        self.session.join().map_err(JoinError::new)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Pause {
    Yield,
    Block,
}

#[derive(Debug)]
struct Wakeup {
    // In run queue or running.
    running: bool,
    // Woken while running.
    notified: bool,
}

pub(crate) enum SchedFlow {
    Yield,
    Block,
    Cease,
}

pub(crate) struct Task {
    id: u64,
    this: Weak<Task>,
    scheduler: Weak<Scheduler>,
    coroutine: UnsafeCell<Box<Coroutine>>,
    state: Arc<StateCell>,
    pause: Cell<Pause>,
    wakeup: Mutex<Wakeup>,
}

// SAFETY: Coroutine and cells are touched only by the thread running this task.
unsafe impl Sync for Task {}
unsafe impl Send for Task {}

impl Task {
    fn new(main: FnMain, stack_size: StackSize, scheduler: &Arc<Scheduler>, state: Arc<StateCell>) -> Arc<Task> {
        let coroutine = Coroutine::new(main, stack_size);
        let id = TID_COUNTER.fetch_add(1, Ordering::Relaxed);
        Arc::new_cyclic(|this| Task {
            id,
            this: this.clone(),
            scheduler: Arc::downgrade(scheduler),
            coroutine: UnsafeCell::new(coroutine),
            state,
            pause: Cell::new(Pause::Yield),
            wakeup: Mutex::new(Wakeup { running: true, notified: false }),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn arc(&self) -> Arc<Task> {
        self.this.upgrade().expect("running task dropped")
    }

    fn set_state(&self, state: TaskState) {
        if !self.state.get().is_terminal() {
            self.state.set(state);
        }
    }

    /// Runs this task until it completes, yields or blocks.
    pub fn sched(&self) -> SchedFlow {
        let _scope = Scope::enter(self);
        self.set_state(TaskState::Running);
        let co = unsafe { &mut *self.coroutine.get() };
        match co.resume() {
            Status::Completed => SchedFlow::Cease,
            Status::Suspended => match self.pause.get() {
                Pause::Yield => SchedFlow::Yield,
                Pause::Block if self.park() => SchedFlow::Block,
                // Woken before we could park.
                Pause::Block => SchedFlow::Yield,
            },
        }
    }

    fn suspend(&self, pause: Pause) {
        self.pause.set(pause);
        let co = unsafe { &mut *self.coroutine.get() };
        co.suspend();
    }

    /// Suspends running task until [Task::unblock].
    pub(crate) fn block(&self) {
        self.set_state(TaskState::Suspended);
        self.suspend(Pause::Block);
    }

    fn yield_now(&self) {
        self.suspend(Pause::Yield);
    }

    // Returns false if this task has been woken meanwhile.
    fn park(&self) -> bool {
        let mut wakeup = self.wakeup.lock().unwrap();
        if wakeup.notified {
            wakeup.notified = false;
            return false;
        }
        wakeup.running = false;
        true
    }

    // Returns true if caller should reschedule this task.
    fn wake(&self) -> bool {
        let mut wakeup = self.wakeup.lock().unwrap();
        if wakeup.running {
            wakeup.notified = true;
            return false;
        }
        wakeup.running = true;
        true
    }

    /// Resumes blocking task in its scheduler.
    pub(crate) fn unblock(self: Arc<Task>) {
        if !self.wake() {
            return;
        }
        if let Some(scheduler) = self.scheduler.upgrade() {
            scheduler.resume(self);
        }
    }
}

/// Yields task for next scheduling cycle.
pub fn yield_now() {
    current().yield_now();
}

/// Spawns a concurrent task and returns a [JoinHandle] for it.
///
/// The task starts with its own coroutine stack. It runs concurrently with the caller and could
/// suspend anywhere in its call stack without occupying a thread.
///
/// # Panics
/// Panic if called outside a runtime.
pub fn spawn<F, T>(f: F) -> JoinHandle<T>
where
    F: FnOnce() -> T,
    F: Send + 'static,
    T: Send + 'static,
{
    Builder::new().spawn(f)
}

#[cfg(test)]
mod tests {
    use std::sync::{mpsc, Arc, Mutex};
    use std::thread;
    use std::time::Duration;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::runtime::Runtime;
    use crate::task;

    #[crate::test(crate = "crate", parallelism = 1)]
    fn yield_now() {
        let shared_value = Arc::new(Mutex::new(0));
        task::spawn({
            let shared_value = shared_value.clone();
            move || {
                let mut value = shared_value.lock().unwrap();
                if *value == 0 {
                    *value = 5;
                }
            }
        });
        task::yield_now();
        assert_eq!(*shared_value.lock().unwrap(), 5);
    }

    #[crate::test(crate = "crate")]
    fn panic() {
        const REASON: &str = "oooooops";
        let t = task::spawn(|| panic!("{}", REASON));
        let err = t.join().unwrap_err();
        assert!(err.to_string().contains(REASON))
    }

    #[crate::test(crate = "crate")]
    fn panic_unwinds_task_stack() {
        let unwound = Arc::new(Mutex::new(false));
        let t = task::spawn({
            let unwound = unwound.clone();
            move || {
                scopeguard::defer! {
                    *unwound.lock().unwrap() = true;
                }
                panic!("unwinding");
            }
        });
        assert_eq!(t.join().unwrap_err().message(), Some("unwinding"));
        assert_eq!(*unwound.lock().unwrap(), true);
    }

    #[crate::test(crate = "crate")]
    fn join_nested() {
        let outer = task::spawn(|| task::spawn(|| 5).join().unwrap() + 1);
        assert_eq!(outer.join().unwrap(), 6);
    }

    #[crate::test(crate = "crate")]
    fn stack_size() {
        fn depth(n: usize) -> usize {
            let frame = std::hint::black_box([1u8; 512]);
            if n == 0 {
                0
            } else {
                depth(n - 1) + frame[n % 512] as usize
            }
        }
        let deep = Builder::new().stack_size(StackSize::with_extra_size(1 << 20)).spawn(|| depth(1000));
        assert_eq!(deep.join().unwrap(), 1000);
    }

    #[test]
    #[should_panic(expected = "no runtime")]
    fn spawn_outside_runtime() {
        task::spawn(|| ());
    }

    #[test]
    fn state_transitions() {
        let runtime = Runtime::new();
        let (sender, receiver) = mpsc::sync_channel::<task::SessionWaker<i32>>(1);
        let handle = runtime.spawn(move || {
            let (session, waker) = task::session::<i32>();
            sender.send(waker).unwrap();
            session.wait()
        });
        let waker = receiver.recv().unwrap();
        while handle.state() != TaskState::Suspended {
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(handle.is_finished(), false);
        waker.wake(5).unwrap();
        while !handle.is_finished() {
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(handle.state(), TaskState::Completed);
        assert_eq!(handle.join().unwrap(), 5);
    }

    #[test]
    fn state_failed() {
        let runtime = Runtime::new();
        let handle = runtime.spawn(|| panic!("failed"));
        while !handle.is_finished() {
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(handle.state(), TaskState::Failed);
        assert_eq!(handle.state().to_string(), "failed");
        assert_eq!(handle.join().unwrap_err().message(), Some("failed"));
    }
}
