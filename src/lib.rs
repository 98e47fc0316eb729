// Frame Warden - self-healing performance governance
// Watches heap drift, DOM growth, frame health, and GPU state for a
// long-running animation host and ratchets quality down and back up.

// Module declarations
pub mod budget;
pub mod bus;
pub mod clock;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod governor;
pub mod guardian;
pub mod host;
pub mod monitors;
pub mod predictive;
pub mod sampler;
pub mod testing;
pub mod watchdog;

// Re-exports for convenience
pub use bus::EventBus;
pub use coordinator::PerfState;
pub use error::{GovernanceError, Result};
pub use events::GovernanceEvent;
pub use governor::{Governor, GovernorConfig, GovernorHosts, StatusReport};

use once_cell::sync::OnceCell;

static LOGGING: OnceCell<()> = OnceCell::new();

/// Initialize tracing output once, honoring `RUST_LOG`. Safe to call
/// from every entry point; later calls are no-ops.
pub fn init_logging() {
    LOGGING.get_or_init(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .try_init();
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_is_idempotent() {
        init_logging();
        init_logging();
    }
}
