//! Database migration between MySQL/MariaDB servers, replication identity
//! capture, and data-directory downgrade protection.

pub mod args;
pub mod db;
pub mod error;
pub mod handle;
pub mod model;
pub mod util;

pub use error::{Error, ExternalToolError, Result};
pub use handle::capture::{capture_server, get_replication_identity};
pub use handle::guard::{check_compatibility, DataDirSafetyGuard, DataDirVersionRecord, GuardOutcome};
pub use handle::migrate::{BackupEngine, MigrationOrchestrator, RestoreEngine, SchemaAdmin};
pub use handle::resolve::{ConfigResolver, ConnectionArgs};
pub use handle::select::{AutoSelector, ConsoleSelector, Selector};
pub use model::migration::{BackupOptions, MigrationConfig, MigrationResult, MigrationSummary};
pub use model::profile::{ConnectionProfile, Provenance};
pub use model::replication::{Dialect, ReplicationIdentity};
