use launchpad::config::Config;
use launchpad::greeting::{Stdout, Variant};
use launchpad::logging;

fn main() {
    logging::init();
    let config = Config::load_or_default();
    if let Err(err) = Variant::FireAndForget.run(Stdout, &config) {
        tracing::error!("launched task failed: {}", err);
    }
}
