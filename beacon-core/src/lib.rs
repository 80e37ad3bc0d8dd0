//! # beacon-core
//!
//! Core library for beacon - a client-side event buffer that survives
//! restarts and delivers events to a remote collector.
//!
//! This library provides:
//! - Domain types for events and batches
//! - The [`EventBuffer`] with debounced, indefinitely retried delivery
//! - Pluggable backup storage, batch encoding and transport
//! - Configuration management
//! - Logging infrastructure
//!
//! ## Delivery contract
//!
//! - Every tracked event is written to the backup before `track` returns
//! - Events tracked within one cooldown window are sent as one request
//! - A batch counts as delivered only when the collector answers `200 OK`
//! - Anything else is retried after another cooldown, forever
//!
//! ## Example
//!
//! ```rust,no_run
//! use beacon_core::{Config, EventBuffer};
//!
//! # #[tokio::main]
//! # async fn main() -> beacon_core::Result<()> {
//! let config = Config::load()?;
//! let buffer = EventBuffer::from_config(&config.buffer)?;
//!
//! buffer.track("level_start", "forest-1");
//! # Ok(())
//! # }
//! ```

// Re-export commonly used items at the crate root
pub use buffer::{DeliveryStats, EventBuffer, EventBufferBuilder, SUCCESS_MARKER};
pub use codec::{BatchCodec, JsonCodec};
pub use config::{BufferConfig, Config};
pub use error::{Error, Result};
pub use storage::{BackupStore, FileStore, MemoryStore};
pub use transport::{HttpTransport, Transport};
pub use types::*;

// Public modules
pub mod buffer;
pub mod codec;
pub mod config;
pub mod error;
pub mod logging;
pub mod storage;
pub mod transport;
pub mod types;
