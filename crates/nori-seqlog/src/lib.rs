//! File-persisted append-only log of scalar values.
//!
//! Implements a shared sequence store with:
//! - Newline-delimited text records (integers, floats, newline-free strings)
//! - In-memory pushes with debounced, batched durable appends
//! - A registry deduplicating open files and reference-counting handles
//! - Modification-time reconciliation to pick up other handles and processes
//! - Negative-index slicing over persisted ++ pending records
//! - A registry-wide event bus (push, change, clear, error)
//!
//! # Example
//!
//! ```no_run
//! use nori_seqlog::{LogEvent, LogOptions, Registry, RegistryConfig, SeqLog};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = Registry::new(RegistryConfig::default())?;
//!     let mut events = registry.subscribe();
//!
//!     let writer = SeqLog::new(&registry);
//!     let reader = SeqLog::new(&registry);
//!     let options = LogOptions::new().with_flush_delay(Duration::from_millis(50));
//!     writer.open("datafile", options).await?;
//!     reader.open("datafile", options).await?;
//!
//!     writer.push(42)?;
//!     while let Ok(event) = events.recv().await {
//!         if let LogEvent::Change { .. } = event {
//!             break;
//!         }
//!     }
//!     println!("reader sees {} records", reader.len());
//!
//!     writer.close().await?;
//!     reader.close().await?;
//!     Ok(())
//! }
//! ```

pub mod bus;
pub mod config;
pub mod error;
pub mod file;
mod handle;
pub mod reconcile;
pub mod registry;
pub mod scalar;
pub mod scheduler;
pub mod view;
mod watch;

pub use bus::{EventBus, LogEvent};
pub use config::{LogOptions, RegistryConfig};
pub use error::{Error, Result};
pub use handle::SeqLog;
pub use registry::{Registry, RegistryEntry};
pub use scalar::Scalar;
