use std::time::{Duration, Instant};

use more_asserts::assert_ge;
use pretty_assertions::assert_eq;

mod greeter {
    use std::time::Duration;

    use launchpad::{task, time};

    #[launchpad::main]
    pub fn main() -> String {
        let world = task::spawn(|| {
            time::delay(Duration::from_millis(20));
            "World"
        });
        format!("Hello, {}", world.join().unwrap())
    }
}

mod single_threaded {
    use std::thread;

    use launchpad::task;

    #[launchpad::main(parallelism = 1)]
    pub fn main() -> bool {
        let current = thread::current().id();
        task::spawn(move || thread::current().id() == current).join().unwrap()
    }
}

mod failing {
    #[launchpad::main]
    pub fn main() {
        launchpad::task::spawn(|| panic!("main failed")).join().unwrap();
    }
}

mod panicking {
    #[launchpad::main]
    pub fn main() {
        panic!("main panicked");
    }
}

#[test]
fn main_returns_value() {
    let now = Instant::now();
    assert_eq!(greeter::main(), "Hello, World");
    assert_ge!(now.elapsed(), Duration::from_millis(20));
}

#[test]
fn main_with_parallelism() {
    assert_eq!(single_threaded::main(), true);
}

#[test]
#[should_panic(expected = "main failed")]
fn main_unwraps_join_error() {
    failing::main();
}

#[test]
#[should_panic(expected = "main panicked")]
fn main_reraises_panic() {
    panicking::main();
}
