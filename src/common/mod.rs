//! Common utilities and types shared across minivol

pub mod config;
pub mod error;
pub mod metrics;
pub mod utils;

pub use config::ReplicaConfig;
pub use error::{Error, Result};
pub use metrics::{Counter, Histogram, ReplicaMetrics};
pub use utils::{format_bytes, parse_size, timestamp_now};
