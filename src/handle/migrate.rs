// 批量迁移: 逐个执行, 每个库恰好产生一个 MigrationResult

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tracing::{error, info, warn};

use crate::error::{Error, Result};
use crate::model::migration::{BackupOptions, MigrationConfig, MigrationResult, MigrationSummary};
use crate::model::profile::ConnectionProfile;

// 备份单个库
#[async_trait]
pub trait BackupEngine: Send + Sync {
    // 批次开始前检查选项, 无法满足时直接报配置错误
    fn check_options(&self, _options: &BackupOptions) -> Result<()> {
        Ok(())
    }

    async fn backup(
        &self,
        profile: &ConnectionProfile,
        database: &str,
        options: &BackupOptions,
    ) -> Result<PathBuf>;
}

// 从备份文件还原
#[async_trait]
pub trait RestoreEngine: Send + Sync {
    async fn restore(
        &self,
        profile: &ConnectionProfile,
        target_database: &str,
        artifact: &Path,
        verify_checksum: bool,
    ) -> Result<()>;
}

// 还原前在目标端执行的建库删库
#[async_trait]
pub trait SchemaAdmin: Send + Sync {
    async fn drop_database(&self, profile: &ConnectionProfile, database: &str) -> Result<()>;
    async fn create_database(&self, profile: &ConnectionProfile, database: &str) -> Result<()>;
}

pub struct MigrationOrchestrator {
    backup: Arc<dyn BackupEngine>,
    restore: Arc<dyn RestoreEngine>,
    admin: Arc<dyn SchemaAdmin>,
}

impl MigrationOrchestrator {
    pub fn new(
        backup: Arc<dyn BackupEngine>,
        restore: Arc<dyn RestoreEngine>,
        admin: Arc<dyn SchemaAdmin>,
    ) -> Self {
        MigrationOrchestrator {
            backup,
            restore,
            admin,
        }
    }

    // 配置错误在任何库开始前返回; 单库失败只记录, 有失败时汇总放进 BatchFailed
    pub async fn migrate_batch(
        &self,
        config: &MigrationConfig,
        databases: &[String],
    ) -> Result<MigrationSummary> {
        validate_batch(config, databases)?;
        self.backup.check_options(&config.source_backup_options())?;
        if config.backup_target {
            self.backup.check_options(&config.target_backup_options())?;
        }

        let started = Instant::now();
        info!(
            "migrating {} database(s) from {} to {}",
            databases.len(),
            config.source,
            config.target
        );

        let total = databases.len();
        let results: Vec<MigrationResult> = stream::iter(databases.iter().enumerate())
            .then(|(idx, name)| async move {
                info!("[{}/{}] migrating {}", idx + 1, total, name);
                self.migrate_one(&config.for_database(name), name).await
            })
            .collect()
            .await;

        let summary = MigrationSummary::from_results(results, started.elapsed());
        info!(
            "batch finished: {} succeeded, {} failed in {:.1}s",
            summary.success_count,
            summary.error_count,
            summary.total_duration.as_secs_f64()
        );
        if summary.is_success() {
            Ok(summary)
        } else {
            Err(Error::BatchFailed(Box::new(summary)))
        }
    }

    // 失败只记录不传播
    async fn migrate_one(&self, item: &MigrationConfig, name: &str) -> MigrationResult {
        let started = Instant::now();
        let mut warnings = Vec::new();
        let mut target_backup_artifact = None;

        let outcome = self
            .run_steps(item, name, &mut warnings, &mut target_backup_artifact)
            .await;

        let (success, error, backup_artifact) = match outcome {
            Ok(path) => {
                info!("[ok] {} migrated in {:.1}s", name, started.elapsed().as_secs_f64());
                (true, None, Some(path))
            }
            Err(StepFailure { message, artifact }) => {
                error!("{}", Error::MigrationItem {
                    database: name.to_string(),
                    message: message.clone(),
                });
                (false, Some(message), artifact)
            }
        };

        MigrationResult {
            source_db: name.to_string(),
            target_db: name.to_string(),
            success,
            error,
            backup_artifact,
            target_backup_artifact,
            warnings,
            duration: started.elapsed(),
        }
    }

    async fn run_steps(
        &self,
        item: &MigrationConfig,
        name: &str,
        warnings: &mut Vec<String>,
        target_backup_artifact: &mut Option<PathBuf>,
    ) -> std::result::Result<PathBuf, StepFailure> {
        if item.backup_target {
            match self
                .backup
                .backup(&item.target, name, &item.target_backup_options())
                .await
            {
                Ok(path) => {
                    info!("target {} backed up to {}", name, path.display());
                    *target_backup_artifact = Some(path);
                }
                Err(e) if item.strict_target_backup => {
                    return Err(StepFailure::new(format!("target backup failed: {}", e)));
                }
                Err(e) => {
                    // 目标库通常还不存在
                    let message = format!("target backup skipped: {}", e);
                    warn!("{}: {}", name, message);
                    warnings.push(message);
                }
            }
        }

        let artifact = self
            .backup
            .backup(&item.source, name, &item.source_backup_options())
            .await
            .map_err(|e| StepFailure::new(format!("source backup failed: {}", e)))?;
        info!("source {} dumped to {}", name, artifact.display());

        if item.drop_target {
            self.admin
                .drop_database(&item.target, name)
                .await
                .map_err(|e| StepFailure::with_artifact(format!("drop target failed: {}", e), &artifact))?;
        }
        if item.create_target {
            self.admin
                .create_database(&item.target, name)
                .await
                .map_err(|e| StepFailure::with_artifact(format!("create target failed: {}", e), &artifact))?;
        }

        self.restore
            .restore(&item.target, name, &artifact, item.verify_data)
            .await
            .map_err(|e| StepFailure::with_artifact(format!("restore failed: {}", e), &artifact))?;

        Ok(artifact)
    }
}

struct StepFailure {
    message: String,
    artifact: Option<PathBuf>,
}

impl StepFailure {
    fn new(message: String) -> Self {
        StepFailure {
            message,
            artifact: None,
        }
    }

    fn with_artifact(message: String, artifact: &Path) -> Self {
        StepFailure {
            message,
            artifact: Some(artifact.to_path_buf()),
        }
    }
}

fn validate_batch(config: &MigrationConfig, databases: &[String]) -> Result<()> {
    if databases.is_empty() {
        return Err(Error::config("no databases selected for migration"));
    }
    if !(config.migrate_data || config.migrate_structure || config.migrate_users) {
        return Err(Error::config(
            "nothing to migrate: users, data and structure are all disabled",
        ));
    }
    let mut seen = HashSet::new();
    for name in databases {
        if name.trim().is_empty() {
            return Err(Error::config("empty database name in list"));
        }
        if !seen.insert(name.as_str()) {
            return Err(Error::config(format!("database `{}` listed more than once", name)));
        }
    }
    if config.source.same_server(&config.target) {
        return Err(Error::config(format!(
            "source and target are the same server ({}:{})",
            config.source.host, config.source.port
        )));
    }
    Ok(())
}
