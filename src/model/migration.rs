// 迁移配置与结果

use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;

use crate::model::profile::ConnectionProfile;

/// Per-artifact pipeline options handed to the backup engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupOptions {
    pub compress: bool,
    pub encrypt: bool,
    pub include_data: bool,
    pub include_structure: bool,
    pub include_users: bool,
    /// 0 keeps every artifact.
    pub retention_days: u32,
    pub checksum: bool,
}

impl Default for BackupOptions {
    fn default() -> Self {
        BackupOptions {
            compress: true,
            encrypt: false,
            include_data: true,
            include_structure: true,
            include_users: false,
            retention_days: 0,
            checksum: true,
        }
    }
}

/// Batch template. [`MigrationConfig::for_database`] derives the per-item copy.
#[derive(Debug, Clone)]
pub struct MigrationConfig {
    pub source: ConnectionProfile,
    pub target: ConnectionProfile,
    pub migrate_users: bool,
    pub migrate_data: bool,
    pub migrate_structure: bool,
    pub verify_data: bool,
    pub backup_target: bool,
    pub drop_target: bool,
    pub create_target: bool,
    /// Fail the item when the pre-overwrite target backup fails.
    pub strict_target_backup: bool,
    pub compress: bool,
    pub encrypt: bool,
    pub retention_days: u32,
    pub checksum: bool,
}

impl MigrationConfig {
    pub fn new(source: ConnectionProfile, target: ConnectionProfile) -> Self {
        MigrationConfig {
            source,
            target,
            migrate_users: false,
            migrate_data: true,
            migrate_structure: true,
            verify_data: false,
            backup_target: false,
            drop_target: false,
            create_target: true,
            strict_target_backup: false,
            compress: true,
            encrypt: false,
            retention_days: 0,
            checksum: true,
        }
    }

    /// Same flags, both profiles pointed at `database`.
    pub fn for_database(&self, database: &str) -> MigrationConfig {
        MigrationConfig {
            source: self.source.with_database(database),
            target: self.target.with_database(database),
            ..self.clone()
        }
    }

    /// Artifacts are sealed, so the backup engine needs a passphrase.
    pub fn needs_passphrase(&self) -> bool {
        self.encrypt
    }

    /// Options for dumping the source database.
    pub fn source_backup_options(&self) -> BackupOptions {
        BackupOptions {
            compress: self.compress,
            encrypt: self.encrypt,
            include_data: self.migrate_data,
            include_structure: self.migrate_structure,
            include_users: self.migrate_users,
            retention_days: self.retention_days,
            checksum: self.checksum || self.verify_data,
        }
    }

    /// Options for the safety backup of the target before it is overwritten.
    pub fn target_backup_options(&self) -> BackupOptions {
        BackupOptions {
            compress: self.compress,
            encrypt: self.encrypt,
            include_data: true,
            include_structure: true,
            include_users: false,
            retention_days: self.retention_days,
            checksum: self.checksum,
        }
    }
}

/// Outcome of one database. Built once, never mutated afterwards.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationResult {
    pub source_db: String,
    pub target_db: String,
    pub success: bool,
    pub error: Option<String>,
    pub backup_artifact: Option<PathBuf>,
    pub target_backup_artifact: Option<PathBuf>,
    pub warnings: Vec<String>,
    pub duration: Duration,
}

/// Aggregate of a batch. `success_count + error_count == databases.len()`.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationSummary {
    pub databases: Vec<String>,
    pub results: Vec<MigrationResult>,
    pub success_count: usize,
    pub error_count: usize,
    pub errors: Vec<String>,
    pub total_duration: Duration,
}

impl MigrationSummary {
    pub fn from_results(results: Vec<MigrationResult>, total_duration: Duration) -> Self {
        let databases = results.iter().map(|r| r.source_db.clone()).collect();
        let success_count = results.iter().filter(|r| r.success).count();
        let errors = results
            .iter()
            .filter(|r| !r.success)
            .map(|r| {
                format!(
                    "{}: {}",
                    r.source_db,
                    r.error.as_deref().unwrap_or("unknown error")
                )
            })
            .collect::<Vec<_>>();
        MigrationSummary {
            databases,
            success_count,
            error_count: errors.len(),
            errors,
            results,
            total_duration,
        }
    }

    pub fn succeeded(&self) -> impl Iterator<Item = &MigrationResult> {
        self.results.iter().filter(|r| r.success)
    }

    pub fn failed(&self) -> impl Iterator<Item = &MigrationResult> {
        self.results.iter().filter(|r| !r.success)
    }

    pub fn is_success(&self) -> bool {
        self.error_count == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(name: &str, error: Option<&str>) -> MigrationResult {
        MigrationResult {
            source_db: name.to_string(),
            target_db: name.to_string(),
            success: error.is_none(),
            error: error.map(str::to_string),
            backup_artifact: None,
            target_backup_artifact: None,
            warnings: Vec::new(),
            duration: Duration::from_millis(5),
        }
    }

    #[test]
    fn summary_partitions_results() {
        let summary = MigrationSummary::from_results(
            vec![
                result("a", None),
                result("b", Some("dump failed")),
                result("c", None),
            ],
            Duration::from_secs(1),
        );
        assert_eq!(summary.databases, vec!["a", "b", "c"]);
        assert_eq!(summary.success_count, 2);
        assert_eq!(summary.error_count, 1);
        assert_eq!(summary.errors, vec!["b: dump failed"]);
        assert!(!summary.is_success());
        assert_eq!(summary.failed().count(), 1);
    }

    #[test]
    fn derived_item_config_keeps_flags() {
        let mut template =
            MigrationConfig::new(ConnectionProfile::default(), ConnectionProfile::default());
        template.backup_target = true;
        template.migrate_users = true;
        let item = template.for_database("crm");
        assert_eq!(item.source.database.as_deref(), Some("crm"));
        assert_eq!(item.target.database.as_deref(), Some("crm"));
        assert!(item.backup_target);
        assert!(item.source_backup_options().include_users);
        assert!(!item.target_backup_options().include_users);
        assert_eq!(template.source.database, None);
    }

    #[test]
    fn encryption_needs_a_passphrase() {
        let mut config =
            MigrationConfig::new(ConnectionProfile::default(), ConnectionProfile::default());
        assert!(!config.needs_passphrase());
        config.encrypt = true;
        assert!(config.needs_passphrase());
        assert!(config.target_backup_options().encrypt);
    }

    #[test]
    fn verification_forces_checksum() {
        let mut config =
            MigrationConfig::new(ConnectionProfile::default(), ConnectionProfile::default());
        config.checksum = false;
        config.verify_data = true;
        assert!(config.source_backup_options().checksum);
    }
}
