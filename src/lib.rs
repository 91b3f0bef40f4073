#![allow(clippy::needless_doctest_main)]

//! # Launch, delay and join lightweight tasks
//! `launchpad` provides a multi-threading runtime to serve lightweight tasks built on
//! cooperative stackful coroutines. A task could [time::delay] anywhere in its call stack without
//! occupying a thread.
//!
//! ## Usage
//! Construct an [runtime::Runtime] to [runtime::Runtime::spawn] initial task, or use
//! [run_blocking] to run a [Scope] which waits for all tasks launched through it.
//!
//! * Use [task::spawn] to spawn new task in running task. The spawned task will run concurrent
//!   with all other tasks.
//! * Use [task::JoinHandle] to join task result.
//! * Use [task::session] to create facilities to wake waiting tasks.
//! * Use [task::mpsc] to send values between tasks and threads.
//!
//! [greeting] hosts three programs built on above: fire-and-forget, joined and composed.
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//!
//! use launchpad::time;
//!
//! fn print_world_later(delay: Duration) {
//!     time::delay(delay);
//!     println!("World");
//! }
//!
//! fn main() {
//!     launchpad::run_blocking(|scope| {
//!         let job = scope.launch(|| print_world_later(Duration::from_millis(100)));
//!         println!("Hello, ");
//!         job.join().unwrap();
//!     })
//!     .unwrap();
//! }
//! ```
//!
//! [macro@main] runs `main` as the first task of a fresh runtime:
//! ```rust
//! use std::time::Duration;
//!
//! use launchpad::{task, time};
//!
//! #[launchpad::main]
//! fn main() {
//!     let job = task::spawn(|| {
//!         time::delay(Duration::from_millis(100));
//!         println!("World");
//!     });
//!     println!("Hello, ");
//!     job.join().unwrap();
//! }
//! ```

pub mod config;
mod coroutine;
mod error;
pub mod greeting;
pub mod logging;
pub mod runtime;
mod scope;
pub mod task;
pub mod time;

pub use coroutine::stack::StackSize;
pub use error::{ConfigError, JoinError};
#[cfg(not(test))]
pub use launchpad_macros::main;
pub use launchpad_macros::test;
pub use runtime::run_blocking;
pub use scope::{scope, Scope};
