//! Greeting programs: a launched task delays then prints "World" while launcher prints "Hello, ".
//!
//! Three variants differ in how launcher waits for the launched task:
//! * [fire_and_forget] blocks its thread for a fixed grace and hopes the task has finished.
//! * [joined] joins the task explicitly inside a [Scope].
//! * [composed] is [joined] with delayed work extracted into [print_world_later].

use std::io::{self, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ignore_result::Ignore;

use crate::config::Config;
use crate::error::JoinError;
use crate::runtime::Runtime;
use crate::scope::Scope;
use crate::time;

pub const HELLO: &str = "Hello, ";
pub const WORLD: &str = "World";

/// Line sink shared by launcher and launched task.
pub trait Output: Clone + Send + Sync + 'static {
    /// Emits one line.
    fn emit(&self, line: &str);
}

/// Writes lines to standard output.
#[derive(Clone, Copy, Debug, Default)]
pub struct Stdout;

impl Output for Stdout {
    fn emit(&self, line: &str) {
        let stdout = io::stdout();
        let mut stdout = stdout.lock();
        writeln!(stdout, "{}", line).ignore();
        stdout.flush().ignore();
    }
}

/// Records lines in memory.
#[derive(Clone, Debug, Default)]
pub struct Transcript {
    lines: Arc<Mutex<Vec<String>>>,
}

impl Transcript {
    pub fn new() -> Transcript {
        Transcript::default()
    }

    /// Lines emitted so far.
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }
}

impl Output for Transcript {
    fn emit(&self, line: &str) {
        self.lines.lock().unwrap().push(line.to_string());
    }
}

/// Delays calling task then emits [WORLD].
///
/// Delay suspends only calling task, so this composes into any task body.
pub fn print_world_later<O: Output>(out: &O, delay: Duration) {
    time::delay(delay);
    out.emit(WORLD);
}

/// Emits [HELLO], launches a detached task in `runtime` and blocks calling thread for `grace`.
///
/// Whether [WORLD] is emitted before the runtime is dropped depends on `delay` being shorter
/// than `grace`. Nothing checks it.
pub fn fire_and_forget<O: Output>(runtime: &Runtime, out: &O, delay: Duration, grace: Duration) {
    out.emit(HELLO);
    let world = out.clone();
    let handle = runtime.spawn(move || {
        time::delay(delay);
        world.emit(WORLD);
    });
    tracing::debug!(task = handle.id(), "launched without join");
    drop(handle);
    time::sleep(grace);
}

/// Emits [HELLO], launches a task in `scope` and joins the task.
///
/// [HELLO] goes first as launched task could run on another thread right away.
pub fn joined<O: Output>(scope: &Scope, out: &O, delay: Duration) -> Result<(), JoinError> {
    out.emit(HELLO);
    let world = out.clone();
    let job = scope.launch(move || {
        time::delay(delay);
        world.emit(WORLD);
    });
    job.join()
}

/// Same as [joined] except launched task runs [print_world_later].
pub fn composed<O: Output>(scope: &Scope, out: &O, delay: Duration) -> Result<(), JoinError> {
    out.emit(HELLO);
    let world = out.clone();
    let job = scope.launch(move || print_world_later(&world, delay));
    job.join()
}

/// Greeting program variants.
#[derive(Copy, Clone, Debug, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum Variant {
    FireAndForget,
    Joined,
    Composed,
}

impl Variant {
    /// Runs this variant in a runtime built from `config` and shuts the runtime down.
    ///
    /// Failure of launched task is returned only by variants that join it.
    pub fn run<O: Output>(self, out: O, config: &Config) -> Result<(), JoinError> {
        tracing::debug!(variant = %self, ?config, "running greeting");
        let delay = config.delay;
        match self {
            Variant::FireAndForget => {
                let runtime = config.runtime().build();
                fire_and_forget(&runtime, &out, delay, config.grace);
                Ok(())
            },
            Variant::Joined => {
                config.runtime().run_blocking(move |scope| joined(scope, &out, delay)).and_then(|result| result)
            },
            Variant::Composed => {
                config.runtime().run_blocking(move |scope| composed(scope, &out, delay)).and_then(|result| result)
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;
    use std::time::Instant;

    use more_asserts::{assert_ge, assert_lt};
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    use super::*;
    use crate::scope;

    fn config(delay: u64, grace: u64) -> Config {
        Config { delay: Duration::from_millis(delay), grace: Duration::from_millis(grace), parallelism: None }
    }

    #[derive(Clone)]
    struct Failing;

    impl Output for Failing {
        fn emit(&self, line: &str) {
            if line == WORLD {
                panic!("no world");
            }
        }
    }

    #[test_case(Variant::FireAndForget, "fire-and-forget")]
    #[test_case(Variant::Joined, "joined")]
    #[test_case(Variant::Composed, "composed")]
    fn variant_name(variant: Variant, name: &str) {
        assert_eq!(variant.to_string(), name);
        assert_eq!(Variant::from_str(name).unwrap(), variant);
    }

    #[test]
    fn variant_unknown() {
        assert!(Variant::from_str("detached").is_err());
    }

    #[test_case(Variant::Joined)]
    #[test_case(Variant::Composed)]
    fn joining_variant_prints_world(variant: Variant) {
        let transcript = Transcript::new();
        let now = Instant::now();
        variant.run(transcript.clone(), &config(100, 5000)).unwrap();
        assert_ge!(now.elapsed(), Duration::from_millis(100));
        assert_lt!(now.elapsed(), Duration::from_millis(2000));
        assert_eq!(transcript.lines(), vec![HELLO, WORLD]);
    }

    #[test_case(Variant::Joined)]
    #[test_case(Variant::Composed)]
    fn joining_variant_fails_with_task(variant: Variant) {
        let err = variant.run(Failing, &config(10, 5000)).unwrap_err();
        assert_eq!(err.message(), Some("no world"));
    }

    #[test]
    fn fire_and_forget_within_grace() {
        let transcript = Transcript::new();
        Variant::FireAndForget.run(transcript.clone(), &config(50, 500)).unwrap();
        assert_eq!(transcript.lines(), vec![HELLO, WORLD]);
    }

    #[test]
    fn fire_and_forget_beyond_grace() {
        let transcript = Transcript::new();
        let now = Instant::now();
        Variant::FireAndForget.run(transcript.clone(), &config(10_000, 50)).unwrap();
        assert_lt!(now.elapsed(), Duration::from_millis(5000));
        assert_eq!(transcript.lines(), vec![HELLO]);
    }

    #[test]
    fn fire_and_forget_swallows_failure() {
        Variant::FireAndForget.run(Failing, &config(10, 200)).unwrap();
    }

    #[test_case(Variant::FireAndForget)]
    #[test_case(Variant::Joined)]
    #[test_case(Variant::Composed)]
    fn hello_before_world_without_delay(variant: Variant) {
        let config = Config { delay: Duration::ZERO, grace: Duration::from_millis(100), parallelism: Some(4) };
        for _ in 0..50 {
            let transcript = Transcript::new();
            variant.run(transcript.clone(), &config).unwrap();
            assert_eq!(transcript.lines(), vec![HELLO, WORLD]);
        }
    }

    #[crate::test(crate = "crate", parallelism = 1)]
    fn composed_equals_joined() {
        let joined_out = Transcript::new();
        scope::scope(|scope| joined(scope, &joined_out, Duration::from_millis(10)).unwrap()).unwrap();
        let composed_out = Transcript::new();
        scope::scope(|scope| composed(scope, &composed_out, Duration::from_millis(10)).unwrap()).unwrap();
        assert_eq!(joined_out.lines(), composed_out.lines());
    }
}
