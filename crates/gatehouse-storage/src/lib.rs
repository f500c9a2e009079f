pub mod memory;
pub mod postgres;
pub mod traits;

pub use memory::InMemoryStore;
pub use postgres::{PostgresSession, PostgresStore};
pub use traits::{
    CountPerResourcePermission, PermissionSession, PermissionStore, SnapshotScope, StorageError,
};
