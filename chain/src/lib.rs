//! Chain-state core for coffer.
//!
//! Keeps a local, eventually consistent view of every tracked account on
//! every supported network. Live data arrives through provider
//! subscriptions; missed data is recovered by the lookup queue and by the
//! historic transfer scanner. Outgoing transactions get their nonce from
//! [`NonceAllocator`] and are followed to confirmation by
//! [`TransactionTracker`]. Everything observed is persisted to the
//! [`coffer_store::ChainStore`] before it is published on the [`EventBus`].

pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod gas;
pub mod logging;
pub mod metrics;
pub mod nonce;
pub mod scanner;
pub mod scheduler;
pub mod service;
pub mod shutdown;
pub mod subscriptions;
pub mod tracing_spans;
pub mod tracker;

pub use config::{AssetConfig, ChainConfig, NetworkConfig, TrackedAccountConfig};
pub use context::ChainContext;
pub use error::ChainError;
pub use events::{ChainEvent, EventBus};
pub use gas::GasOracle;
pub use logging::{init_logging, LogFormat};
pub use metrics::ChainMetrics;
pub use nonce::NonceAllocator;
pub use scanner::{HistoricScanner, ScanOutcome, ScannerConfig};
pub use scheduler::Scheduler;
pub use service::{ChainService, ServiceSettings};
pub use shutdown::{OsSignal, ShutdownController, ShutdownSignal};
pub use subscriptions::{ConnectionState, SubscriptionManager};
pub use tracker::{DrainReport, TrackerConfig, TransactionTracker};
