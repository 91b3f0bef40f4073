//! Delay tasks cooperatively or sleep threads.
//!
//! A ticker thread publishes elapsed milliseconds to a timer task. [delay] registers a session in
//! the timer and blocks calling task on it, so no thread is occupied while the task waits.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::thread;
use std::time::{Duration, Instant};

use derive_where::derive_where;
use ignore_result::Ignore;
use slab::Slab;

use crate::runtime::Scheduler;
use crate::task::mpsc::{Receiver, Sender};
use crate::task::{self, SessionWaker};

pub(crate) const STOP_MSG: &str = "runtime stopped";

#[derive_where(Debug)]
pub(crate) enum Message {
    Timeout {
        millis: u64,
        #[derive_where(skip)]
        waker: SessionWaker<()>,
    },
    Tick {
        now: u64,
    },
    Stop,
}

/// Pending timeouts ordered by deadline in milliseconds since runtime start.
pub(crate) struct Timer {
    now: u64,
    wakers: Slab<SessionWaker<()>>,
    deadlines: BinaryHeap<Reverse<(u64, usize)>>,
}

impl Timer {
    pub fn new() -> Timer {
        Timer { now: 0, wakers: Slab::new(), deadlines: BinaryHeap::new() }
    }

    pub fn len(&self) -> usize {
        self.wakers.len()
    }

    pub fn schedule(&mut self, millis: u64, waker: SessionWaker<()>) {
        let key = self.wakers.insert(waker);
        self.deadlines.push(Reverse((self.now.saturating_add(millis), key)));
    }

    /// Advances clock to `now` and wakes expired sessions. Returns number of woken sessions.
    pub fn advance(&mut self, now: u64) -> usize {
        self.now = self.now.max(now);
        let mut expired = 0;
        while let Some(&Reverse((deadline, key))) = self.deadlines.peek() {
            if deadline > self.now {
                break;
            }
            self.deadlines.pop();
            self.wakers.remove(key).wake(()).ignore();
            expired += 1;
        }
        expired
    }

    /// Fails all pending sessions.
    pub fn cancel(&mut self, reason: &'static str) -> usize {
        self.deadlines.clear();
        let pending = self.wakers.len();
        for waker in self.wakers.drain() {
            waker.cancel(reason);
        }
        pending
    }
}

/// Publishes elapsed milliseconds until timer stops.
pub(crate) fn tick(sender: Sender<Message>) {
    let start = Instant::now();
    let mut now = 0;
    loop {
        thread::sleep(Duration::from_millis(1));
        let elapsed = start.elapsed().as_millis() as u64;
        if elapsed <= now {
            continue;
        }
        now = elapsed;
        if sender.send(Message::Tick { now }).is_err() {
            break;
        }
    }
}

/// Serves timeouts until [Message::Stop].
pub(crate) fn timer(mut receiver: Receiver<Message>) {
    let mut timer = Timer::new();
    while let Some(message) = receiver.recv() {
        match message {
            // Plus one tick as current one could have partially elapsed.
            Message::Timeout { millis, waker } => {
                timer.schedule(millis.saturating_add(1), waker);
                tracing::trace!(millis, pending = timer.len(), "timeout scheduled");
            },
            Message::Tick { now } => {
                timer.advance(now);
            },
            Message::Stop => receiver.close(),
        }
    }
    let cancelled = timer.cancel(STOP_MSG);
    tracing::debug!(cancelled, "timer stopped");
}

/// Suspends calling task for at least given duration.
///
/// Scheduling thread is free to run other tasks meanwhile. Zero duration yields.
///
/// # Panics
/// * Panic if called outside a runtime.
/// * Panic with "runtime stopped" if runtime stops before deadline.
pub fn delay(duration: Duration) {
    // Practically infinite if it does not fit.
    let millis = u64::try_from(duration.as_nanos().div_ceil(1_000_000)).unwrap_or(u64::MAX);
    if millis == 0 {
        task::yield_now();
        return;
    }
    let sender = Scheduler::try_current().expect("no runtime").timer();
    let (session, waker) = task::session();
    if sender.send(Message::Timeout { millis, waker }).is_err() {
        panic!("{}", STOP_MSG);
    }
    session.wait();
}

/// Blocks calling thread for at least given duration.
///
/// Unlike [delay], other tasks can not use this thread meanwhile, and nothing observes whether
/// launched tasks finished in time.
pub fn sleep(duration: Duration) {
    tracing::trace!(?duration, "thread sleeping");
    thread::sleep(duration);
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use more_asserts::{assert_ge, assert_lt};
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    use super::*;
    use crate::runtime::{Builder, Runtime};
    use crate::{task, time};

    #[test_case(0, 1)]
    #[test_case(0, 2)]
    #[test_case(1111, 1)]
    #[test_case(22, 222)]
    #[test_case(111, 1 << 14)]
    #[test_case(1 << 24, 1 << 20)]
    fn timer_expires_at_deadline(start: u64, millis: u64) {
        let mut timer = Timer::new();
        timer.advance(start);
        let (session, waker) = task::session();
        timer.schedule(millis, waker);
        assert_eq!(timer.advance(start + millis - 1), 0);
        assert_eq!(session.is_ready(), false);
        assert_eq!(timer.advance(start + millis), 1);
        assert_eq!(timer.len(), 0);
        session.wait();
    }

    #[test]
    fn timer_expires_in_order() {
        let mut timer = Timer::new();
        let (late, late_waker) = task::session();
        let (early, early_waker) = task::session();
        timer.schedule(20, late_waker);
        timer.schedule(10, early_waker);
        assert_eq!(timer.advance(15), 1);
        assert_eq!(early.is_ready(), true);
        assert_eq!(late.is_ready(), false);
        assert_eq!(timer.advance(25), 1);
        assert_eq!(late.is_ready(), true);
    }

    #[test]
    #[should_panic(expected = "runtime stopped")]
    fn timer_cancel() {
        let mut timer = Timer::new();
        let (session, waker) = task::session::<()>();
        timer.schedule(10, waker);
        assert_eq!(timer.cancel(STOP_MSG), 1);
        session.wait();
    }

    #[test]
    fn runtime_delay() {
        let runtime = Runtime::new();
        let now = Instant::now();
        let delayed = runtime.spawn(|| {
            time::delay(Duration::from_millis(300));
        });
        delayed.join().unwrap();
        assert_ge!(now.elapsed(), Duration::from_millis(300));
    }

    #[test]
    fn timer_saturates_far_deadline() {
        let mut timer = Timer::new();
        timer.advance(100);
        let (far, far_waker) = task::session::<()>();
        let (near, near_waker) = task::session::<()>();
        timer.schedule(u64::MAX, far_waker);
        timer.schedule(5, near_waker);
        assert_eq!(timer.advance(105), 1);
        assert_eq!(near.is_ready(), true);
        assert_eq!(timer.advance(u64::MAX - 1), 0);
        assert_eq!(far.is_ready(), false);
        assert_eq!(timer.len(), 1);
    }

    #[test]
    fn runtime_delay_far_future() {
        let runtime = Runtime::new();
        let forever = runtime.spawn(|| time::delay(Duration::MAX));
        let later = runtime.spawn(|| time::delay(Duration::from_millis(u64::MAX)));
        while forever.state() != task::TaskState::Suspended || later.state() != task::TaskState::Suspended {
            std::thread::sleep(Duration::from_millis(1));
        }
        let now = Instant::now();
        let delayed = runtime.spawn(|| time::delay(Duration::from_millis(10)));
        delayed.join().unwrap();
        assert_ge!(now.elapsed(), Duration::from_millis(10));
        assert_eq!(forever.is_finished(), false);
        assert_eq!(later.is_finished(), false);
        drop(runtime);
        assert_eq!(forever.join().unwrap_err().message(), Some(STOP_MSG));
        assert_eq!(later.join().unwrap_err().message(), Some(STOP_MSG));
    }

    #[test]
    fn runtime_delay_zero() {
        let runtime = Runtime::new();
        let delayed = runtime.spawn(|| {
            time::delay(Duration::ZERO);
        });
        delayed.join().unwrap();
    }

    #[test]
    fn runtime_delay_not_blocking_thread() {
        let runtime = Builder::default().parallelism(1).build();
        let now = Instant::now();
        let tasks: Vec<_> = (0..8).map(|_| runtime.spawn(|| time::delay(Duration::from_millis(400)))).collect();
        tasks.into_iter().for_each(|task| task.join().unwrap());
        assert_ge!(now.elapsed(), Duration::from_millis(400));
        // Serial delays would take 3200ms.
        assert_lt!(now.elapsed(), Duration::from_millis(2400));
    }

    #[test]
    fn runtime_stopped_before_deadline() {
        let runtime = Runtime::new();
        let delayed = runtime.spawn(|| {
            time::delay(Duration::from_secs(60));
            "finished"
        });
        while delayed.state() != task::TaskState::Suspended {
            std::thread::sleep(Duration::from_millis(1));
        }
        drop(runtime);
        let err = delayed.join().unwrap_err();
        assert_eq!(err.message(), Some(STOP_MSG));
    }

    #[test]
    #[should_panic(expected = "no runtime")]
    fn delay_outside_runtime() {
        time::delay(Duration::from_millis(1));
    }

    #[test]
    fn thread_sleep() {
        let now = Instant::now();
        time::sleep(Duration::from_millis(50));
        assert_ge!(now.elapsed(), Duration::from_millis(50));
    }
}
