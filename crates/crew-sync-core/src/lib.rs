pub mod access;
pub mod backend;
pub mod connectivity;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod families;
#[cfg(feature = "http")]
pub mod http;
pub mod identity;
pub mod queue;
pub mod records;
pub mod refresh;
pub mod schema;
pub mod store;
pub mod test_utils;

pub use access::{AccessBoundary, AccessContext, AccessPatch, CapturedContext, Role};
pub use backend::{classify, Backend, BackendError, ErrorClass, Predicate, RemoteWrite, Row, Select};
pub use connectivity::Connectivity;
pub use coordinator::{start_sync_coordinator, SyncCoordinator, SyncCoordinatorConfig};
pub use engine::{SyncEngine, SyncOutcome};
pub use error::{Result, SyncError};
pub use families::EntityFamily;
pub use identity::{ensure_identifier, is_identifier, stable_identifier_from};
pub use queue::{MutationQueue, Operation, QueuedOperation};
pub use refresh::{ChangeNotice, CollectionHub, LiveRefresh};
pub use schema::{SchemaDetector, SchemaMode};
pub use store::{FileStore, KeyValueStore, MemoryStore};

pub use crew_sync_config as config;
