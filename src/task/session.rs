use std::marker::PhantomData;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::{mem, thread};

use static_assertions::{assert_impl_all, assert_not_impl_any};

use crate::error::PanicError;
use crate::task::{self, Task};

/// Who is blocking on a session.
#[derive(Clone)]
enum Joiner {
    Task(Arc<Task>),
    Thread(thread::Thread),
}

impl Joiner {
    fn current() -> Joiner {
        match task::task() {
            Some(task) => Joiner::Task(task.arc()),
            None => Joiner::Thread(thread::current()),
        }
    }

    fn wait(&self) {
        match self {
            Joiner::Task(task) => task.block(),
            Joiner::Thread(_) => thread::park(),
        }
    }

    fn wake(self) {
        match self {
            Joiner::Task(task) => task.unblock(),
            Joiner::Thread(thread) => thread.unpark(),
        }
    }
}

enum SessionState<T> {
    Empty,
    Joining(Joiner),
    Ready(Result<T, PanicError>),
    Joined,
}

pub(crate) struct SessionJoint<T: Send + 'static> {
    state: Mutex<SessionState<T>>,
    wakers: AtomicUsize,
}

impl<T: Send + 'static> SessionJoint<T> {
    fn new() -> Arc<Self> {
        Arc::new(SessionJoint { state: Mutex::new(SessionState::Empty), wakers: AtomicUsize::new(1) })
    }

    fn is_ready(&self) -> bool {
        matches!(*self.state.lock().unwrap(), SessionState::Ready(_))
    }

    /// Stores result for joiner. Returns given result back if session was fulfilled or dropped.
    fn fulfill(&self, result: Result<T, PanicError>) -> Option<Result<T, PanicError>> {
        let mut state = self.state.lock().unwrap();
        if matches!(*state, SessionState::Ready(_) | SessionState::Joined) {
            return Some(result);
        }
        let previous = mem::replace(&mut *state, SessionState::Ready(result));
        drop(state);
        if let SessionState::Joining(joiner) = previous {
            joiner.wake();
        }
        None
    }

    fn wake(&self, value: T) -> Result<(), T> {
        match self.fulfill(Ok(value)) {
            None => Ok(()),
            Some(Ok(value)) => Err(value),
            Some(Err(_)) => unreachable!("session: rejected value changed"),
        }
    }

    fn fault(&self, err: PanicError) {
        self.fulfill(Err(err));
    }

    fn add_waker(&self) {
        self.wakers.fetch_add(1, Ordering::Relaxed);
    }

    fn remove_waker(&self) {
        if self.wakers.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.fault(PanicError::Static("session: no wakeup"));
        }
    }

    fn join(&self) -> Result<T, PanicError> {
        let joiner = Joiner::current();
        loop {
            let mut state = self.state.lock().unwrap();
            match mem::replace(&mut *state, SessionState::Joined) {
                SessionState::Ready(result) => return result,
                SessionState::Empty | SessionState::Joining(_) => {
                    // Waiting again after spurious wakeup.
                    *state = SessionState::Joining(joiner.clone());
                    drop(state);
                    joiner.wait();
                },
                SessionState::Joined => unreachable!("session: already joined"),
            }
        }
    }

    fn close(&self) {
        *self.state.lock().unwrap() = SessionState::Joined;
    }
}

/// Session provides method to block current task or thread until waking by [SessionWaker].
pub struct Session<T: Send + 'static> {
    joint: Arc<SessionJoint<T>>,
    marker: PhantomData<NotSendable>,
}

/// SessionWaker provides method to wake associated [Session].
pub struct SessionWaker<T: Send + 'static> {
    joint: Arc<SessionJoint<T>>,
    marker: PhantomData<Sendable>,
}

struct NotSendable(std::rc::Rc<()>);
assert_not_impl_any!(NotSendable: Send, Sync);

struct Sendable(std::rc::Rc<()>);
unsafe impl Send for Sendable {}
assert_impl_all!(Sendable: Send);
assert_not_impl_any!(Sendable: Sync);

// SessionWaker should be able to send across tasks and threads.
assert_impl_all!(SessionWaker<()>: Send);

// SessionWaker should owned by only one task or thread.
assert_not_impl_any!(SessionWaker<()>: Sync);

// Session should be used only by creating task or thread.
assert_not_impl_any!(Session<()>: Send, Sync);

impl<T: Send + 'static> Session<T> {
    /// Checks whether a value or failure has arrived.
    pub fn is_ready(&self) -> bool {
        self.joint.is_ready()
    }

    pub(crate) fn join(self) -> Result<T, PanicError> {
        self.joint.join()
    }

    /// Waits peer to wake it.
    ///
    /// # Panics
    /// Panic if no wakeup from [SessionWaker].
    ///
    /// # Guarantee
    /// Only two situations can happen:
    /// * This method panics and no value sent
    /// * This method returns and only one value sent
    pub fn wait(self) -> T {
        match self.join() {
            Ok(value) => value,
            Err(err) => err.resume(),
        }
    }
}

impl<T: Send + 'static> Drop for Session<T> {
    fn drop(&mut self) {
        self.joint.close();
    }
}

impl<T: Send + 'static> SessionWaker<T> {
    /// Wakes associated session with given value.
    ///
    /// Returns value back if session has been woken or dropped.
    pub fn wake(self, value: T) -> Result<(), T> {
        self.joint.wake(value)
    }

    pub(crate) fn set_result(self, result: Result<T, PanicError>) {
        self.joint.fulfill(result);
    }

    /// Fails associated session with static reason.
    pub(crate) fn cancel(self, reason: &'static str) {
        self.joint.fault(PanicError::Static(reason));
    }
}

impl<T: Send> Clone for SessionWaker<T> {
    fn clone(&self) -> Self {
        self.joint.add_waker();
        Self { joint: self.joint.clone(), marker: PhantomData }
    }
}

impl<T: Send> Drop for SessionWaker<T> {
    fn drop(&mut self) {
        self.joint.remove_waker();
    }
}

/// Constructs facilities to block and wake task or thread.
pub fn session<T: Send + 'static>() -> (Session<T>, SessionWaker<T>) {
    let joint = SessionJoint::new();
    let session = Session { joint: joint.clone(), marker: PhantomData };
    let waker = SessionWaker { joint, marker: PhantomData };
    (session, waker)
}
