// Error types for the governance engine
//
// Failure domains follow a fixed taxonomy: measurement errors degrade to
// skipped checks, remediation errors are caught and counted at the call
// site, configuration errors fall back to defaults. Nothing here is
// allowed to escape a timer or event callback.

use std::fmt;

/// Error codes for structured error reporting
///
/// Provides a standard way to get error codes and messages from the
/// governance error types, so diagnostic surfaces (CLI, status snapshots)
/// can report failures numerically without string matching.
pub trait ErrorCode {
    /// Get the numeric error code
    fn code(&self) -> i32;

    /// Get the human-readable error message
    fn message(&self) -> String;
}

/// Governance error code constants
///
/// Single source of truth for the numeric codes surfaced by
/// [`GovernanceError`] and [`ConfigError`]. Range: 2001-2004.
pub struct GovernanceErrorCodes {}

impl GovernanceErrorCodes {
    /// Mutex/RwLock was poisoned
    pub const LOCK_POISONED: i32 = 2001;

    /// A delegated remediation callback failed
    pub const REMEDIATION_FAILED: i32 = 2002;

    /// Budgets configuration could not be read
    pub const CONFIG_READ: i32 = 2003;

    /// Budgets configuration could not be parsed
    pub const CONFIG_PARSE: i32 = 2004;
}

/// Errors raised by governor lifecycle and cross-component plumbing
#[derive(Debug, Clone, PartialEq)]
pub enum GovernanceError {
    /// Mutex/RwLock was poisoned
    LockPoisoned { component: String },

    /// A cleanup/disposal callback returned an error
    RemediationFailed { target: String, reason: String },
}

impl ErrorCode for GovernanceError {
    fn code(&self) -> i32 {
        match self {
            GovernanceError::LockPoisoned { .. } => GovernanceErrorCodes::LOCK_POISONED,
            GovernanceError::RemediationFailed { .. } => GovernanceErrorCodes::REMEDIATION_FAILED,
        }
    }

    fn message(&self) -> String {
        match self {
            GovernanceError::LockPoisoned { component } => {
                format!("Lock poisoned on {}", component)
            }
            GovernanceError::RemediationFailed { target, reason } => {
                format!("Remediation of {} failed: {}", target, reason)
            }
        }
    }
}

impl GovernanceError {
    pub fn lock_poisoned(component: &str) -> Self {
        GovernanceError::LockPoisoned {
            component: component.to_string(),
        }
    }
}

impl fmt::Display for GovernanceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for GovernanceError {}

/// Convenience alias for governor lifecycle operations
pub type Result<T> = std::result::Result<T, GovernanceError>;

/// Errors raised while loading the budgets configuration document
///
/// Always non-fatal: the budget enforcer falls back to baked-in defaults
/// and logs a warning carrying the code below.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// The config document could not be read from disk
    ReadFailed { path: String, reason: String },

    /// The config document is not valid JSON
    ParseFailed { path: String, reason: String },
}

impl ErrorCode for ConfigError {
    fn code(&self) -> i32 {
        match self {
            ConfigError::ReadFailed { .. } => GovernanceErrorCodes::CONFIG_READ,
            ConfigError::ParseFailed { .. } => GovernanceErrorCodes::CONFIG_PARSE,
        }
    }

    fn message(&self) -> String {
        match self {
            ConfigError::ReadFailed { path, reason } => {
                format!("Failed to read budgets config {}: {}", path, reason)
            }
            ConfigError::ParseFailed { path, reason } => {
                format!("Failed to parse budgets config {}: {}", path, reason)
            }
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for ConfigError {}
