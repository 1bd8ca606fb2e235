//! Anomaly report storage
//!
//! The health monitor appends reports here; the healing executor reads the
//! unresolved critical ones, oldest first.

mod store;

pub use store::{AnomalyStore, AnomalyStoreConfig};
