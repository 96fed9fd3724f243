//! picture-book - Container Registry Synchronization Daemon
//!
//! picture-book keeps one or more destination registries stocked with the images a discovery
//! script says they should hold. Each registry is synced on its own cron schedule, and a small
//! HTTP control plane can pause, resume and inspect the running syncers.
//!
//! ## Modules
//!
//! - [`config`]: Configuration management and parsing
//! - [`catalog`]: The immutable set of configured registries
//! - [`discovery`]: Image discovery through external scripts
//! - [`oracle`]: Destination registry existence checks
//! - [`client`]: Pull, tag, push and remove through the docker CLI
//! - [`syncer`]: The per-registry sync cycle
//! - [`scheduler`]: Cron-driven, non-overlapping job execution
//! - [`pool`]: Live syncers and their scheduled jobs
//! - [`api`]: HTTP control plane

pub mod api;
pub mod catalog;
pub mod client;
pub mod config;
pub mod daemon;
pub mod discovery;
pub mod display;
pub mod error;
pub mod image;
pub mod oracle;
pub mod pool;
pub mod scheduler;
pub mod syncer;

pub use catalog::RegistryCatalog;
pub use config::{Config, RegistryConfig};
pub use daemon::Daemon;
pub use error::{Result, SyncError};
pub use pool::{SyncerPool, SyncerSummary};
pub use syncer::{SyncReport, Syncer};
