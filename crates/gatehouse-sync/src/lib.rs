pub mod audit;
pub mod changer;
pub mod cli;
pub mod config;
pub mod error;
pub mod indexer;
pub mod metrics;
pub mod telemetry;
pub mod updater;

pub use changer::{GroupPermissionChanger, UserPermissionChanger};
pub use error::SyncError;
pub use indexer::AuthorizationIndexer;
pub use metrics::Metrics;
pub use updater::PermissionUpdater;
