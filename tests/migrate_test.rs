use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use dbferry::{
    BackupEngine, BackupOptions, ConnectionProfile, Error, ExternalToolError, MigrationConfig,
    MigrationOrchestrator, MigrationSummary, RestoreEngine, Result, SchemaAdmin,
};

const SOURCE_HOST: &str = "old-db";
const TARGET_HOST: &str = "new-db";

/// Two in-memory servers that record every call made against them.
#[derive(Default)]
struct FakeServers {
    target_dbs: Mutex<HashSet<String>>,
    broken_source_dumps: HashSet<String>,
    broken_restores: HashSet<String>,
    calls: Mutex<Vec<String>>,
    verify_flags: Mutex<Vec<bool>>,
    // 没有备份口令
    no_passphrase: bool,
}

impl FakeServers {
    fn failing_source(names: &[&str]) -> Self {
        FakeServers {
            broken_source_dumps: names.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    fn log(&self, entry: String) {
        self.calls.lock().unwrap().push(entry);
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

fn tool_error(stderr: &str) -> Error {
    Error::ExternalTool(ExternalToolError::Exit {
        program: "mysqldump".to_string(),
        code: Some(2),
        stderr: stderr.to_string(),
    })
}

#[async_trait]
impl BackupEngine for FakeServers {
    fn check_options(&self, options: &BackupOptions) -> Result<()> {
        if options.encrypt && self.no_passphrase {
            return Err(Error::config("artifact encryption needs DBFERRY_BACKUP_PASSPHRASE"));
        }
        Ok(())
    }

    async fn backup(
        &self,
        profile: &ConnectionProfile,
        database: &str,
        _options: &BackupOptions,
    ) -> Result<PathBuf> {
        let side = if profile.host == SOURCE_HOST { "source" } else { "target" };
        self.log(format!("backup {} {}", side, database));
        if side == "target" && !self.target_dbs.lock().unwrap().contains(database) {
            return Err(tool_error(&format!("Unknown database '{}'", database)));
        }
        if side == "source" && self.broken_source_dumps.contains(database) {
            return Err(tool_error("Lost connection to server"));
        }
        Ok(PathBuf::from(format!("/backups/{}/{}.sql.gz", side, database)))
    }
}

#[async_trait]
impl RestoreEngine for FakeServers {
    async fn restore(
        &self,
        _profile: &ConnectionProfile,
        target_database: &str,
        artifact: &Path,
        verify_checksum: bool,
    ) -> Result<()> {
        self.log(format!("restore {} from {}", target_database, artifact.display()));
        self.verify_flags.lock().unwrap().push(verify_checksum);
        if self.broken_restores.contains(target_database) {
            return Err(tool_error("ERROR 1064 (42000) at line 1"));
        }
        Ok(())
    }
}

#[async_trait]
impl SchemaAdmin for FakeServers {
    async fn drop_database(&self, _profile: &ConnectionProfile, database: &str) -> Result<()> {
        self.log(format!("drop {}", database));
        self.target_dbs.lock().unwrap().remove(database);
        Ok(())
    }

    async fn create_database(&self, _profile: &ConnectionProfile, database: &str) -> Result<()> {
        self.log(format!("create {}", database));
        self.target_dbs.lock().unwrap().insert(database.to_string());
        Ok(())
    }
}

fn config() -> MigrationConfig {
    let source = ConnectionProfile {
        host: SOURCE_HOST.to_string(),
        ..Default::default()
    };
    let target = ConnectionProfile {
        host: TARGET_HOST.to_string(),
        ..Default::default()
    };
    MigrationConfig::new(source, target)
}

fn orchestrator(fake: &Arc<FakeServers>) -> MigrationOrchestrator {
    MigrationOrchestrator::new(fake.clone(), fake.clone(), fake.clone())
}

fn names(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn expect_failed(result: Result<MigrationSummary>) -> MigrationSummary {
    match result {
        Err(Error::BatchFailed(summary)) => *summary,
        other => panic!("expected BatchFailed, got {:?}", other.map(|s| s.success_count)),
    }
}

#[tokio::test]
async fn failed_item_does_not_stop_the_batch() {
    let fake = Arc::new(FakeServers::failing_source(&["db2"]));
    let summary = expect_failed(
        orchestrator(&fake)
            .migrate_batch(&config(), &names(&["db1", "db2", "db3"]))
            .await,
    );

    assert_eq!(summary.success_count, 2);
    assert_eq!(summary.error_count, 1);
    assert_eq!(summary.databases, names(&["db1", "db2", "db3"]));
    assert_eq!(summary.errors.len(), 1);
    assert!(summary.errors[0].starts_with("db2: source backup failed"));

    let calls = fake.calls();
    assert!(calls.contains(&"restore db1 from /backups/source/db1.sql.gz".to_string()));
    assert!(calls.contains(&"restore db3 from /backups/source/db3.sql.gz".to_string()));
    assert!(!calls.iter().any(|c| c.starts_with("restore db2")));
    assert!(!calls.iter().any(|c| c == "create db2"));
}

#[tokio::test]
async fn every_database_lands_in_exactly_one_partition() {
    let fake = Arc::new(FakeServers {
        broken_source_dumps: ["b", "e"].iter().map(|s| s.to_string()).collect(),
        broken_restores: ["c"].iter().map(|s| s.to_string()).collect(),
        ..Default::default()
    });
    let requested = names(&["a", "b", "c", "d", "e", "f"]);
    let summary = expect_failed(orchestrator(&fake).migrate_batch(&config(), &requested).await);

    assert_eq!(summary.success_count + summary.error_count, requested.len());
    let ok: HashSet<_> = summary.succeeded().map(|r| r.source_db.clone()).collect();
    let failed: HashSet<_> = summary.failed().map(|r| r.source_db.clone()).collect();
    assert!(ok.is_disjoint(&failed));
    let all: HashSet<_> = ok.union(&failed).cloned().collect();
    assert_eq!(all, requested.iter().cloned().collect::<HashSet<_>>());
    let expected: HashSet<String> = ["b", "c", "e"].iter().map(|s| s.to_string()).collect();
    assert_eq!(failed, expected);

    // 还原失败时保留源端备份路径
    let c = summary.results.iter().find(|r| r.source_db == "c").unwrap();
    assert_eq!(c.backup_artifact, Some(PathBuf::from("/backups/source/c.sql.gz")));
}

#[tokio::test]
async fn missing_target_only_warns_when_backing_up_target() {
    let fake = Arc::new(FakeServers::default());
    let mut cfg = config();
    cfg.backup_target = true;

    let summary = orchestrator(&fake)
        .migrate_batch(&cfg, &names(&["fresh"]))
        .await
        .expect("item should succeed");

    let result = &summary.results[0];
    assert!(result.success);
    assert_eq!(result.target_backup_artifact, None);
    assert_eq!(result.warnings.len(), 1);
    assert!(result.warnings[0].contains("Unknown database 'fresh'"));
    assert_eq!(
        fake.calls(),
        vec![
            "backup target fresh",
            "backup source fresh",
            "create fresh",
            "restore fresh from /backups/source/fresh.sql.gz",
        ]
    );
}

#[tokio::test]
async fn existing_target_is_backed_up_before_overwrite() {
    let fake = Arc::new(FakeServers::default());
    fake.target_dbs.lock().unwrap().insert("shop".to_string());
    let mut cfg = config();
    cfg.backup_target = true;
    cfg.drop_target = true;

    let summary = orchestrator(&fake)
        .migrate_batch(&cfg, &names(&["shop"]))
        .await
        .unwrap();

    let result = &summary.results[0];
    assert_eq!(
        result.target_backup_artifact,
        Some(PathBuf::from("/backups/target/shop.sql.gz"))
    );
    assert!(result.warnings.is_empty());
    assert_eq!(
        fake.calls(),
        vec![
            "backup target shop",
            "backup source shop",
            "drop shop",
            "create shop",
            "restore shop from /backups/source/shop.sql.gz",
        ]
    );
}

#[tokio::test]
async fn strict_target_backup_fails_item_before_source_is_touched() {
    let fake = Arc::new(FakeServers::default());
    let mut cfg = config();
    cfg.backup_target = true;
    cfg.strict_target_backup = true;

    let summary = expect_failed(orchestrator(&fake).migrate_batch(&cfg, &names(&["fresh"])).await);
    assert_eq!(summary.error_count, 1);
    assert!(summary.results[0]
        .error
        .as_deref()
        .unwrap()
        .starts_with("target backup failed"));
    assert_eq!(fake.calls(), vec!["backup target fresh"]);
}

#[tokio::test]
async fn empty_batch_is_a_configuration_error() {
    let fake = Arc::new(FakeServers::default());
    let err = orchestrator(&fake).migrate_batch(&config(), &[]).await.unwrap_err();
    assert!(matches!(err, Error::Configuration(_)));
    assert!(fake.calls().is_empty());
}

#[tokio::test]
async fn encryption_without_passphrase_fails_before_any_item() {
    let fake = Arc::new(FakeServers {
        no_passphrase: true,
        ..Default::default()
    });
    let mut cfg = config();
    cfg.encrypt = true;
    cfg.backup_target = true;

    let err = orchestrator(&fake)
        .migrate_batch(&cfg, &names(&["a", "b"]))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Configuration(_)), "{}", err);
    assert!(fake.calls().is_empty());

    cfg.encrypt = false;
    let summary = orchestrator(&fake)
        .migrate_batch(&cfg, &names(&["a"]))
        .await
        .unwrap();
    assert!(summary.is_success());
}

#[tokio::test]
async fn verify_flag_reaches_restore() {
    let fake = Arc::new(FakeServers::default());
    let mut cfg = config();
    cfg.verify_data = true;
    cfg.create_target = false;

    let summary = orchestrator(&fake)
        .migrate_batch(&cfg, &names(&["a", "b"]))
        .await
        .unwrap();
    assert!(summary.is_success());
    assert_eq!(*fake.verify_flags.lock().unwrap(), vec![true, true]);
    assert!(!fake.calls().iter().any(|c| c.starts_with("create")));
}
