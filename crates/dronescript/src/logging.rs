//! Logging setup for the `dronescript` binary and tests.
//!
//! Flight logs come from several layers at very different rates: the mission
//! logs a handful of phase changes, the simulator logs every state transition,
//! and the monitors and estimator log on every poll. Each [`Verbosity`] maps to
//! a set of per-module directives so that raising the level shows the next
//! layer down without drowning it in the one below.

use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Verbosity level for logging output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    /// Errors only.
    Quiet,
    /// Mission phases, connection and results.
    #[default]
    Normal,
    /// Drone state transitions, storage and monitor lifecycle.
    Verbose,
    /// Every estimate, controller command and detected blob.
    Trace,
}

impl Verbosity {
    /// Base level for the `dronescript` target.
    #[must_use]
    pub fn to_level_filter(&self) -> Level {
        match self {
            Self::Quiet => Level::ERROR,
            Self::Normal => Level::INFO,
            Self::Verbose => Level::DEBUG,
            Self::Trace => Level::TRACE,
        }
    }

    /// `EnvFilter` directives used when `RUST_LOG` is not set.
    ///
    /// On top of the base level, the storage layer is held at `warn` in normal
    /// output and unchanged monitor samples are never shown.
    #[must_use]
    pub fn directives(&self) -> String {
        let base = format!("dronescript={}", self.to_level_filter());
        let overrides: &[&str] = match self {
            Self::Quiet | Self::Verbose => &[],
            Self::Normal => &["dronescript::storage=warn"],
            Self::Trace => &["dronescript::monitor=debug"],
        };
        std::iter::once(base.as_str())
            .chain(overrides.iter().copied())
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Install the global subscriber.
///
/// `RUST_LOG` replaces the verbosity directives entirely when set. Calling
/// this more than once keeps the first subscriber.
///
/// # Examples
///
/// ```no_run
/// use dronescript::{init_logging, logging::Verbosity};
///
/// init_logging(Verbosity::Verbose);
/// ```
pub fn init_logging(verbosity: Verbosity) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(verbosity.directives()));

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true).with_thread_ids(false))
        .try_init();
}

/// Route warnings to the test harness output.
#[cfg(test)]
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("dronescript=warn")
        .with_test_writer()
        .try_init();
}
