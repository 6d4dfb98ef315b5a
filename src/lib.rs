/// Error types for the replicator
pub mod error;

/// Observations read from the telemetry store
pub mod observation;

/// Model type to telemetry field classification
pub mod classification;

/// Patch documents and twin identifiers
pub mod patch;

/// Configuration management
pub mod config;

/// Telemetry store port and InfluxDB implementation
pub mod source;

/// Twin graph port and Azure Digital Twins implementation
pub mod twins;

/// Reconciliation engine
pub mod engine;

/// Self-monitoring of reconciliation passes
pub mod monitoring;

/// Periodic host loop
pub mod service;

// Re-export commonly used types
pub use engine::{PassOutcome, Replicator};
pub use error::{ConfigError, SourceError, TwinError};
pub use service::ReplicationService;
