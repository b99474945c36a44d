//! Tracing subscriber setup

use std::io::IsTerminal;
use std::sync::OnceLock;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

static INITIALISED: OnceLock<bool> = OnceLock::new();

/// Install a `fmt` subscriber filtered by `RUST_LOG` (default `info`)
///
/// Safe to call repeatedly; only the first call installs anything. Returns
/// `false` when another global subscriber was already set by the host
/// application.
pub fn init_tracing() -> bool {
    *INITIALISED.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_ansi(std::io::stderr().is_terminal())
            .with_writer(std::io::stderr);
        Registry::default().with(filter).with(fmt_layer).try_init().is_ok()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        let first = init_tracing();
        assert_eq!(init_tracing(), first);
    }
}
