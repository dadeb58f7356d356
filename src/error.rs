//! Error types and result handling for mail-producer.
//!
//! This module defines the main error type [`Error`] and a convenience
//! [`Result`] type alias used throughout the crate.
//!
//! None of these errors ever reach an HTTP client. Startup failures are
//! logged by [`Messaging`](crate::Messaging) and publish failures are logged
//! by the [`Publisher`](crate::Publisher).
//!
//! # Example
//!
//! ```rust
//! use mail_producer::{Error, Result};
//!
//! fn connect_to_broker() -> Result<()> {
//!     Err(Error::Connect("broker refused connection".to_string()))
//! }
//!
//! match connect_to_broker() {
//!     Ok(()) => println!("Connected"),
//!     Err(Error::Connect(msg)) => eprintln!("Connection error: {}", msg),
//!     Err(e) => eprintln!("Other error: {}", e),
//! }
//! ```

use thiserror::Error;

/// The main error type for mail-producer operations.
#[derive(Error, Debug)]
pub enum Error {
    /// An admin or producer connection to the broker could not be opened.
    #[error("Connection error: {0}")]
    Connect(String),

    /// Listing or creating topics failed on an open admin connection.
    #[error("Provisioning error: {0}")]
    Provision(String),

    /// A publish attempt failed after a producer connection existed.
    #[error("Send error: {0}")]
    Send(String),

    /// A publish was attempted while the producer was not connected.
    #[error("Producer not ready")]
    NotReady,

    /// A broker round-trip did not finish within the configured bound.
    #[error("Timeout error: {message}")]
    Timeout {
        /// Description of what timed out
        message: String,
    },

    /// Invalid configuration values.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration file or environment could not be loaded.
    #[error("Settings error: {0}")]
    Settings(#[from] ::config::ConfigError),

    /// JSON serialization error when encoding message payloads.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Kafka client construction error.
    #[error("Kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),
}

/// A convenient Result type alias for mail-producer operations.
///
/// This is equivalent to `std::result::Result<T, mail_producer::Error>`.
pub type Result<T> = std::result::Result<T, Error>;
