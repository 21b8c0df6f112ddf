//! Error types for the durability simulator

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while configuring or running a simulation
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML configuration could not be parsed
    #[error("Failed to parse configuration: {0}")]
    ConfigParse(#[from] serde_yaml::Error),

    /// Result serialization failed
    #[error("Failed to serialize result: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Metrics registry error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    // =========================================================================
    // Redundancy Scheme Errors
    // =========================================================================
    /// Invalid redundancy scheme parameters
    #[error("Invalid redundancy scheme: {0}")]
    InvalidScheme(String),

    /// Unsupported locality threshold pair
    #[error("No loss threshold defined for locality code with n={n}, k={k}")]
    UnsupportedThreshold { n: usize, k: usize },

    /// Unknown generator kind or malformed generator parameters
    #[error("Invalid generator '{name}': {reason}")]
    InvalidGenerator { name: String, reason: String },

    // =========================================================================
    // Model Invariant Violations
    // =========================================================================
    /// Block state vector does not match the scheme width
    #[error("Stripe state has {actual} blocks, scheme requires {expected}")]
    StateLength { expected: usize, actual: usize },

    /// Attempted to repair a block that is not damaged
    #[error("Block {index} is already normal")]
    BlockNotDamaged { index: usize },

    /// Attempted to repair a stripe that cannot be decoded
    #[error("Stripe cannot be repaired: {available} of {required} blocks available")]
    NotRepairable { available: usize, required: usize },

    /// Event or duration time outside the valid range
    #[error("Invalid timestamp {0}")]
    InvalidTimestamp(f64),

    /// Event addressed to a unit of the wrong kind
    #[error("Event {event} cannot target {unit}")]
    InvalidEventTarget { event: String, unit: String },

    // =========================================================================
    // Placement Errors
    // =========================================================================
    /// No disk with free capacity after the retry budget
    #[error("Placement failed for stripe {stripe} after {retries} retries")]
    CapacityExhausted { stripe: usize, retries: usize },

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}
