//! Log setup for binaries and tests.
//!
//! Nothing in the library installs a subscriber on its own. Call
//! [`LogConfig::install_global`] once from `main`, or hold the guard from
//! [`LogConfig::init`] for a scoped subscriber.

use crate::error::ServerError;
use tracing::Level;
use tracing::subscriber::DefaultGuard;
use tracing_subscriber::FmtSubscriber;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogConfig {
    pub level: Level,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self { level: Level::INFO }
    }
}

/// Restores the previous subscriber when dropped.
#[derive(Debug)]
#[must_use = "the subscriber is removed when the guard is dropped"]
pub struct LogGuard {
    _guard: DefaultGuard,
}

impl LogConfig {
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    fn subscriber(self) -> FmtSubscriber {
        FmtSubscriber::builder().with_max_level(self.level).finish()
    }

    /// Sets the subscriber for the current thread until the guard drops.
    pub fn init(self) -> LogGuard {
        LogGuard { _guard: tracing::subscriber::set_default(self.subscriber()) }
    }

    /// Sets the process wide subscriber.
    ///
    /// # Errors
    ///
    /// [`ServerError::Runtime`] if a global subscriber was already set.
    pub fn install_global(self) -> Result<(), ServerError> {
        tracing::subscriber::set_global_default(self.subscriber()).map_err(|e| ServerError::runtime("logging", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fmt_installed() -> bool {
        tracing::dispatcher::get_default(|d| d.is::<FmtSubscriber>())
    }

    #[test]
    fn scoped_subscriber_is_restored() {
        assert!(!fmt_installed());
        {
            let _guard = LogConfig::new(Level::TRACE).init();
            assert!(fmt_installed());
        }
        assert!(!fmt_installed());
    }
}
