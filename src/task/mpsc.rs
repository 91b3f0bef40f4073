//! Unbounded multi-producer, single-consumer FIFO queue across tasks and threads.
//!
//! Sending never blocks. Receiving blocks calling task or thread until a value arrives or all
//! senders are gone.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use ignore_result::Ignore;

use crate::task::{self, SessionWaker};

struct Queue<T> {
    values: VecDeque<T>,
    senders: usize,
    closed: bool,
    // Set while receiver is waiting for values.
    receiver: Option<SessionWaker<()>>,
}

impl<T> Queue<T> {
    /// Closes queue and returns waiting receiver to wake.
    fn close(&mut self) -> Option<SessionWaker<()>> {
        self.closed = true;
        self.receiver.take()
    }
}

fn notify(receiver: Option<SessionWaker<()>>) {
    if let Some(receiver) = receiver {
        receiver.wake(()).ignore();
    }
}

/// Sending peer of [Receiver]. Additional senders could be constructed by [Sender::clone].
pub struct Sender<T: Send + 'static> {
    queue: Arc<Mutex<Queue<T>>>,
}

impl<T: Send + 'static> Sender<T> {
    /// Sends a value to receiving peer. Value is returned back if channel is closed.
    pub fn send(&self, value: T) -> Result<(), T> {
        let mut queue = self.queue.lock().unwrap();
        if queue.closed {
            return Err(value);
        }
        queue.values.push_back(value);
        let receiver = queue.receiver.take();
        drop(queue);
        notify(receiver);
        Ok(())
    }
}

impl<T: Send + 'static> Clone for Sender<T> {
    fn clone(&self) -> Self {
        self.queue.lock().unwrap().senders += 1;
        Sender { queue: self.queue.clone() }
    }
}

impl<T: Send + 'static> Drop for Sender<T> {
    fn drop(&mut self) {
        let mut queue = self.queue.lock().unwrap();
        queue.senders -= 1;
        if queue.senders == 0 {
            let receiver = queue.close();
            drop(queue);
            notify(receiver);
        }
    }
}

/// Receiving peer of [Sender].
pub struct Receiver<T: Send + 'static> {
    queue: Arc<Mutex<Queue<T>>>,
}

impl<T: Send + 'static> Receiver<T> {
    /// Receives a value from [Sender]s.
    ///
    /// Returns [None] if channel is closed and has no buffered values. A channel is considered
    /// as closed if all senders have been dropped or [Receiver::close] has been called.
    pub fn recv(&mut self) -> Option<T> {
        loop {
            let mut queue = self.queue.lock().unwrap();
            if let Some(value) = queue.values.pop_front() {
                return Some(value);
            } else if queue.closed {
                return None;
            }
            let (session, waker) = task::session::<()>();
            queue.receiver = Some(waker);
            drop(queue);
            session.wait();
        }
    }

    /// Closes this channel for future sending. Buffered values are still receivable.
    pub fn close(&mut self) {
        self.queue.lock().unwrap().closed = true;
    }
}

impl<T: Send + 'static> Drop for Receiver<T> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Constructs an unbounded FIFO channel.
pub fn unbounded<T: Send + 'static>(initial_capacity: usize) -> (Sender<T>, Receiver<T>) {
    let queue = Arc::new(Mutex::new(Queue {
        values: VecDeque::with_capacity(initial_capacity),
        senders: 1,
        closed: false,
        receiver: None,
    }));
    (Sender { queue: queue.clone() }, Receiver { queue })
}
