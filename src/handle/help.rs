// mysqldump/mysql 备份还原, 库结构管理
// 每个方法自己建立连接或子进程, 返回前释放

use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
    time::{Duration, SystemTime},
};

use async_trait::async_trait;
use sqlx::{Connection, Executor, Row};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::db::dialect;
use crate::db::mysql_db::{self, column_text, quote_ident, quote_literal};
use crate::error::{Error, Result};
use crate::handle::databases::{is_system_database, DatabaseCatalog};
use crate::handle::migrate::{BackupEngine, RestoreEngine, SchemaAdmin};
use crate::model::migration::BackupOptions;
use crate::model::profile::ConnectionProfile;
use crate::model::replication::Dialect;
use crate::model::settings::{Binaries, Settings, Timeouts};
use crate::util::artifact::{self, ArtifactKind, ArtifactWriter, Compression};
use crate::util::common::timestamp;
use crate::util::exec::{stream_stdin, stream_stdout};

#[derive(Clone, Debug)]
pub struct MysqlHelp {
    backup_dir: PathBuf,
    binaries: Binaries,
    timeouts: Timeouts,
    passphrase: Option<String>,
}

impl MysqlHelp {
    // passphrase 用于加密和解密备份文件
    pub fn new(settings: &Settings, passphrase: Option<String>) -> Self {
        MysqlHelp {
            backup_dir: settings.backup.dir.clone(),
            binaries: settings.binaries.clone(),
            timeouts: settings.timeouts.clone(),
            passphrase,
        }
    }

    pub async fn get_mysql_version(&self, profile: &ConnectionProfile) -> Result<String> {
        let mut conn = mysql_db::connect(&profile.server_level()).await?;
        let row: (String,) = sqlx::query_as("SELECT VERSION()")
            .fetch_one(&mut conn)
            .await?;
        conn.close().await?;
        Ok(row.0)
    }

    fn passphrase_for(&self, options: &BackupOptions) -> Result<Option<&str>> {
        match (options.encrypt, self.passphrase.as_deref()) {
            (true, None) => Err(Error::config(
                "artifact encryption needs DBFERRY_BACKUP_PASSPHRASE",
            )),
            (true, p) => Ok(p),
            (false, _) => Ok(None),
        }
    }

    fn client_command(&self, program: &str, profile: &ConnectionProfile) -> Command {
        let mut cmd = Command::new(program);
        cmd.arg(format!("--host={}", profile.host))
            .arg(format!("--port={}", profile.port))
            .arg(format!("--user={}", profile.user))
            .arg("--default-character-set=utf8mb4")
            // 密码不出现在进程参数中
            .env("MYSQL_PWD", &profile.password);
        cmd
    }

    // mysqldump
    fn mysqldump_command(
        &self,
        profile: &ConnectionProfile,
        db_name: &str,
        options: &BackupOptions,
        dialect: Dialect,
    ) -> Command {
        let mut cmd = self.client_command(&self.binaries.mysqldump, profile);
        cmd.arg("--single-transaction"); // 一致性事务快照
        if dialect::queries(dialect).dump_set_gtid_purged {
            cmd.arg("--set-gtid-purged=OFF");
        }
        if options.include_structure {
            cmd.arg("--triggers") // 备份触发器
                .arg("--routines") // 备份存储过程和函数
                .arg("--events"); // 备份事件
        } else {
            cmd.arg("--no-create-info").arg("--skip-triggers");
        }
        if !options.include_data {
            cmd.arg("--no-data");
        }
        cmd.arg(db_name);
        cmd
    }

    // 导出内容直接流入备份文件, 不在内存中缓存整个库
    async fn fill_artifact(
        &self,
        writer: &mut ArtifactWriter,
        profile: &ConnectionProfile,
        db_name: &str,
        options: &BackupOptions,
        dialect: Dialect,
    ) -> Result<()> {
        if options.include_data || options.include_structure {
            let cmd = self.mysqldump_command(profile, db_name, options, dialect);
            let bytes = stream_stdout(&self.binaries.mysqldump, cmd, writer, self.timeouts.dump()).await?;
            debug!("mysqldump {} produced {} bytes", db_name, bytes);
        }
        if options.include_users {
            let users = self.export_users(profile, db_name).await?;
            writer.write_all(users.as_bytes())?;
        }
        Ok(())
    }

    // 对 db_name 有权限的账号: CREATE USER 与 GRANT 语句
    async fn export_users(&self, profile: &ConnectionProfile, db_name: &str) -> Result<String> {
        let mut conn = mysql_db::connect(&profile.server_level()).await?;
        let escaped = db_name.replace('_', "\\_");
        let accounts = sqlx::query("SELECT DISTINCT User, Host FROM mysql.db WHERE Db = ? OR Db = ?")
            .bind(db_name)
            .bind(&escaped)
            .fetch_all(&mut conn)
            .await?;

        let mut sql = format!("\n-- accounts with privileges on {}\n", quote_ident(db_name));
        for row in accounts {
            let user = column_text(&row, 0).unwrap_or_default();
            let host = column_text(&row, 1).unwrap_or_default();
            if user.is_empty() {
                continue;
            }
            let account = format!("{}@{}", quote_literal(&user), quote_literal(&host));

            // raw_sql 的 fetch_optional 在空结果时报 RowNotFound, 统一用 fetch_all
            let show_create = format!("SHOW CREATE USER {}", account);
            let create = (&mut conn).fetch_all(sqlx::raw_sql(&show_create)).await?;
            if let Some(stmt) = create.first().and_then(|r| column_text(r, 0)) {
                sql.push_str(&idempotent_create_user(&stmt));
                sql.push_str(";\n");
            }
            let show_grants = format!("SHOW GRANTS FOR {}", account);
            let grants = (&mut conn).fetch_all(sqlx::raw_sql(&show_grants)).await?;
            for grant in grants.iter().filter_map(|r| column_text(r, 0)) {
                sql.push_str(&grant);
                sql.push_str(";\n");
            }
        }
        conn.close().await?;
        Ok(sql)
    }

    // 按服务器分目录: <backup dir>/<host>_<port>/
    pub fn server_dir(&self, profile: &ConnectionProfile) -> PathBuf {
        let host: String = profile
            .host
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
            .collect();
        self.backup_dir.join(format!("{}_{}", host, profile.port))
    }

    // 删除 dir 中 db_name 超过保留天数的备份, keep 除外
    pub fn prune_artifacts(
        &self,
        dir: &Path,
        db_name: &str,
        retention_days: u32,
        keep: &Path,
    ) -> Vec<PathBuf> {
        if retention_days == 0 {
            return Vec::new();
        }
        let max_age = Duration::from_secs(u64::from(retention_days) * 24 * 3600);
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("retention scan of {} failed: {}", dir.display(), e);
                return Vec::new();
            }
        };

        let now = SystemTime::now();
        let mut removed = Vec::new();
        for path in entries.filter_map(|e| e.ok().map(|e| e.path())) {
            if path == keep {
                continue;
            }
            let belongs = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(artifact::database_from_artifact)
                .as_deref()
                == Some(db_name);
            if !belongs {
                continue;
            }
            let expired = fs::metadata(&path)
                .and_then(|m| m.modified())
                .ok()
                .and_then(|modified| now.duration_since(modified).ok())
                .is_some_and(|age| age > max_age);
            if !expired {
                continue;
            }
            match fs::remove_file(&path) {
                Ok(()) => {
                    let _ = fs::remove_file(artifact::checksum_path(&path));
                    info!("retention removed {}", path.display());
                    removed.push(path);
                }
                Err(e) => warn!("retention could not remove {}: {}", path.display(), e),
            }
        }
        removed
    }
}

fn idempotent_create_user(stmt: &str) -> String {
    const PREFIX: &str = "CREATE USER ";
    match stmt.strip_prefix(PREFIX) {
        Some(rest) if !rest.starts_with("IF NOT EXISTS") => {
            format!("CREATE USER IF NOT EXISTS {}", rest)
        }
        _ => stmt.to_string(),
    }
}

// 备份数据库
#[async_trait]
impl BackupEngine for MysqlHelp {
    fn check_options(&self, options: &BackupOptions) -> Result<()> {
        self.passphrase_for(options).map(|_| ())
    }

    async fn backup(
        &self,
        profile: &ConnectionProfile,
        database: &str,
        options: &BackupOptions,
    ) -> Result<PathBuf> {
        let passphrase = self.passphrase_for(options)?;
        let version = self.get_mysql_version(profile).await?;
        let dialect = Dialect::from_version(&version);

        let kind = ArtifactKind {
            compression: if options.compress {
                Compression::Gzip
            } else {
                Compression::None
            },
            encrypted: options.encrypt,
        };
        let dir = self.server_dir(profile);
        fs::create_dir_all(&dir)?;
        let path = dir.join(artifact::artifact_file_name(database, &timestamp(), kind));

        let mut writer = ArtifactWriter::create(&path, kind, passphrase, options.checksum)?;
        if let Err(e) = self
            .fill_artifact(&mut writer, profile, database, options, dialect)
            .await
        {
            writer.abandon();
            return Err(e);
        }
        let path = writer.finish()?;
        info!("[ok] database {} dumped to {}", database, path.display());
        self.prune_artifacts(&dir, database, options.retention_days, &path);
        Ok(path)
    }
}

// 还原数据库
#[async_trait]
impl RestoreEngine for MysqlHelp {
    async fn restore(
        &self,
        profile: &ConnectionProfile,
        target_database: &str,
        artifact: &Path,
        verify_checksum: bool,
    ) -> Result<()> {
        if verify_checksum {
            artifact::verify_checksum(artifact)?;
            debug!("checksum ok for {}", artifact.display());
        }
        let mut sql = artifact::open_reader(artifact, self.passphrase.as_deref())?;
        let mut cmd = self.client_command(&self.binaries.mysql, profile);
        cmd.arg(target_database);
        stream_stdin(&self.binaries.mysql, cmd, &mut sql, self.timeouts.restore()).await?;
        info!("[ok] database {} restored from {}", target_database, artifact.display());
        Ok(())
    }
}

#[async_trait]
impl SchemaAdmin for MysqlHelp {
    async fn drop_database(&self, profile: &ConnectionProfile, database: &str) -> Result<()> {
        let mut conn = mysql_db::connect(&profile.server_level()).await?;
        let drop = format!("DROP DATABASE IF EXISTS {}", quote_ident(database));
        (&mut conn).execute(sqlx::raw_sql(&drop)).await?;
        conn.close().await?;
        info!("dropped target database {}", database);
        Ok(())
    }

    async fn create_database(&self, profile: &ConnectionProfile, database: &str) -> Result<()> {
        let mut conn = mysql_db::connect(&profile.server_level()).await?;
        let exists = sqlx::query("SELECT SCHEMA_NAME FROM information_schema.SCHEMATA WHERE SCHEMA_NAME = ?")
            .bind(database)
            .fetch_optional(&mut conn)
            .await?;
        if exists.is_none() {
            let create = format!("CREATE DATABASE IF NOT EXISTS {}", quote_ident(database));
            (&mut conn).execute(sqlx::raw_sql(&create)).await?;
            info!("database {} created", database);
        } else {
            debug!("database {} already exists", database);
        }
        conn.close().await?;
        Ok(())
    }
}

#[async_trait]
impl DatabaseCatalog for MysqlHelp {
    async fn list_databases(&self, profile: &ConnectionProfile) -> Result<Vec<String>> {
        let mut conn = mysql_db::connect(&profile.server_level()).await?;
        let rows = sqlx::query("SHOW DATABASES").fetch_all(&mut conn).await?;
        conn.close().await?;
        let mut databases = Vec::new();
        for row in rows {
            let db_name: String = row.try_get("Database")?;
            if !is_system_database(&db_name) {
                databases.push(db_name);
            }
        }
        Ok(databases)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::settings::BackupSettings;

    fn help(dir: &Path, passphrase: Option<&str>) -> MysqlHelp {
        let settings = Settings {
            backup: BackupSettings {
                dir: dir.to_path_buf(),
                ..Default::default()
            },
            ..Default::default()
        };
        MysqlHelp::new(&settings, passphrase.map(str::to_string))
    }

    fn options(compress: bool, encrypt: bool) -> BackupOptions {
        BackupOptions {
            compress,
            encrypt,
            ..Default::default()
        }
    }

    #[test]
    fn encryption_without_passphrase_fails_the_options_check() {
        let dir = tempfile::tempdir().unwrap();
        let err = help(dir.path(), None)
            .check_options(&options(true, true))
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
        assert!(help(dir.path(), None).check_options(&options(true, false)).is_ok());
        assert!(help(dir.path(), Some("pw")).check_options(&options(false, true)).is_ok());
    }

    #[tokio::test]
    async fn backup_without_passphrase_touches_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let profile = ConnectionProfile {
            host: "127.0.0.1".to_string(),
            port: 1,
            ..Default::default()
        };
        let err = help(dir.path(), None)
            .backup(&profile, "shop", &options(true, true))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn retention_matches_encoded_database_names() {
        let dir = tempfile::tempdir().unwrap();
        let h = help(dir.path(), None);
        let kind = ArtifactKind {
            compression: Compression::None,
            encrypted: false,
        };
        let old = dir.path().join(artifact::artifact_file_name("a/b", "20200101_000000", kind));
        let fresh = dir.path().join(artifact::artifact_file_name("a/b", "20990101_000000", kind));
        for p in [&old, &fresh] {
            fs::write(p, b"x").unwrap();
        }
        let past = SystemTime::now() - Duration::from_secs(30 * 24 * 3600);
        fs::File::options().write(true).open(&old).unwrap().set_modified(past).unwrap();

        assert_eq!(h.prune_artifacts(dir.path(), "a/b", 7, &fresh), vec![old]);
    }

    #[test]
    fn retention_only_touches_expired_artifacts_of_the_same_database() {
        let dir = tempfile::tempdir().unwrap();
        let h = help(dir.path(), None);
        let old = dir.path().join("backup_shop_20200101_000000.sql.gz");
        let other = dir.path().join("backup_crm_20200101_000000.sql.gz");
        let fresh = dir.path().join("backup_shop_20990101_000000.sql.gz");
        for p in [&old, &other, &fresh] {
            fs::write(p, b"x").unwrap();
        }
        fs::write(artifact::checksum_path(&old), b"abc").unwrap();
        let past = SystemTime::now() - Duration::from_secs(30 * 24 * 3600);
        for p in [&old, &other] {
            fs::File::options().write(true).open(p).unwrap().set_modified(past).unwrap();
        }

        let removed = h.prune_artifacts(dir.path(), "shop", 7, &fresh);
        assert_eq!(removed, vec![old.clone()]);
        assert!(!old.exists());
        assert!(!artifact::checksum_path(&old).exists());
        assert!(other.exists());
        assert!(fresh.exists());
        assert!(h.prune_artifacts(dir.path(), "crm", 0, &fresh).is_empty());
    }

    #[test]
    fn servers_get_separate_directories() {
        let h = help(Path::new("/b"), None);
        let profile = ConnectionProfile {
            host: "db/1:x".to_string(),
            port: 3307,
            ..Default::default()
        };
        assert_eq!(h.server_dir(&profile), PathBuf::from("/b/db_1_x_3307"));
    }

    #[test]
    fn create_user_becomes_idempotent() {
        assert_eq!(
            idempotent_create_user("CREATE USER `app`@`%` IDENTIFIED BY PASSWORD '*AB'"),
            "CREATE USER IF NOT EXISTS `app`@`%` IDENTIFIED BY PASSWORD '*AB'"
        );
        assert_eq!(
            idempotent_create_user("CREATE USER IF NOT EXISTS `a`@`%`"),
            "CREATE USER IF NOT EXISTS `a`@`%`"
        );
    }
}
