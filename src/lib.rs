pub use crew_sync_config as config;
pub use crew_sync_core::{
    access, backend, connectivity, coordinator, engine, error, families, identity, queue, records,
    refresh, schema, store, test_utils,
};

#[cfg(feature = "http")]
pub use crew_sync_core::http;

pub use crew_sync_core::{
    AccessBoundary, AccessContext, AccessPatch, Role, SyncEngine, SyncError, SyncOutcome,
};
