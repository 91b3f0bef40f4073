//! Structured concurrency: a scope outlives every task launched through it.

use std::panic::{self, AssertUnwindSafe};

use ignore_result::Ignore;

use crate::error::{panic_message, JoinError, PanicError};
use crate::task::mpsc::{self, Sender};
use crate::task::{self, JoinHandle};

/// Launches tasks whose termination is awaited by the enclosing [scope].
pub struct Scope {
    // Each launched task owns a clone. Channel closes once all of them terminated.
    sender: Sender<PanicError>,
}

impl Scope {
    /// Launches a concurrent task within this scope and returns a [JoinHandle] for it.
    ///
    /// The task is attached to this scope even if the handle is dropped: [scope] does not return
    /// before it terminates. A panic of the task fails the whole scope.
    ///
    /// # Panics
    /// Panic if called outside a runtime.
    pub fn launch<F, T>(&self, f: F) -> JoinHandle<T>
    where
        F: FnOnce() -> T,
        F: Send + 'static,
        T: Send + 'static,
    {
        let sender = self.sender.clone();
        task::spawn(move || match panic::catch_unwind(AssertUnwindSafe(f)) {
            Ok(value) => value,
            Err(payload) => {
                let message = panic_message(payload.as_ref()).unwrap_or("..").to_string();
                sender.send(PanicError::Unwind(Box::new(message))).ignore();
                panic::resume_unwind(payload)
            },
        })
    }
}

/// Runs `f` with a [Scope] and waits for all tasks launched through it.
///
/// Returns result of `f` if neither `f` nor any launched task panicked. Otherwise, returns the
/// panic of `f` if any, or the first reported panic of launched tasks. Either way, all launched
/// tasks have terminated when this function returns.
pub fn scope<F, T>(f: F) -> Result<T, JoinError>
where
    F: FnOnce(&Scope) -> T,
{
    let (sender, mut receiver) = mpsc::unbounded(16);
    let scope = Scope { sender };
    let result = panic::catch_unwind(AssertUnwindSafe(|| f(&scope)));
    drop(scope);
    let mut failure = None;
    while let Some(err) = receiver.recv() {
        failure.get_or_insert(err);
    }
    match (result, failure) {
        (Err(payload), _) => Err(JoinError::new(PanicError::Unwind(payload))),
        (Ok(_), Some(err)) => Err(JoinError::new(err)),
        (Ok(value), None) => Ok(value),
    }
}
