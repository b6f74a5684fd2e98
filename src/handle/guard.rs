// 数据目录降级保护
// 服务端不能在更高 major.minor 版本写过的数据目录上启动; 冲突时由操作员 (或自动确认) 决定修复还是中止

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::handle::select::Selector;
use crate::handle::service::{DataDirInitializer, ServiceManager};
use crate::model::replication::Dialect;
use crate::util::common::timestamp;

pub const MARIADB_MARKER: &str = "mariadb_upgrade_info";
// 按查找顺序
pub const MARKER_FILES: [&str; 2] = [MARIADB_MARKER, "mysql_upgrade_info"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DataDirVersionRecord {
    pub existing_version: Option<String>,
    // 版本号来自哪个标记文件
    pub marker: Option<String>,
    pub target_version: String,
    pub is_downgrade: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardOutcome {
    Compatible(DataDirVersionRecord),
    Remediated {
        record: DataDirVersionRecord,
        backup_path: PathBuf,
    },
}

// (major, minor), 非数字或缺失部分记为 0
pub fn parse_major_minor(version: &str) -> (u32, u32) {
    let mut parts = version.trim().split('.').map(|part| {
        let digits: String = part.chars().take_while(|c| c.is_ascii_digit()).collect();
        digits.parse::<u32>().unwrap_or(0)
    });
    let major = parts.next().unwrap_or(0);
    let minor = parts.next().unwrap_or(0);
    (major, minor)
}

pub fn is_downgrade(existing: &str, target: &str) -> bool {
    parse_major_minor(existing) > parse_major_minor(target)
}

// 返回 (标记文件名, 版本号); 不存在或不可读时为 None
pub fn read_marker(data_dir: &Path) -> Option<(&'static str, String)> {
    for name in MARKER_FILES {
        let path = data_dir.join(name);
        match fs::read_to_string(&path) {
            Ok(text) => {
                let version = text.trim().trim_end_matches('\0').to_string();
                if !version.is_empty() {
                    return Some((name, version));
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("cannot read {}: {}", path.display(), e),
        }
    }
    None
}

// 没有标记文件视为兼容
pub fn check_compatibility(data_dir: &Path, target_version: &str) -> (bool, DataDirVersionRecord) {
    let (marker, existing) = match read_marker(data_dir) {
        Some((name, version)) => (Some(name.to_string()), Some(version)),
        None => (None, None),
    };
    let conflict = existing
        .as_deref()
        .is_some_and(|existing| is_downgrade(existing, target_version));
    let record = DataDirVersionRecord {
        existing_version: existing,
        marker,
        target_version: target_version.to_string(),
        is_downgrade: conflict,
    };
    (conflict, record)
}

// 目标版本串常不带 "MariaDB" (如 10.5.9); MySQL 没有 10.x 以上版本, 5.x 两家都有, 此时看旧目录
pub fn target_dialect(record: &DataDirVersionRecord) -> Dialect {
    if Dialect::from_version(&record.target_version) == Dialect::MariaDb {
        return Dialect::MariaDb;
    }
    match parse_major_minor(&record.target_version).0 {
        10.. => Dialect::MariaDb,
        6..=9 => Dialect::MySql,
        _ => {
            let mariadb_dir = record.marker.as_deref() == Some(MARIADB_MARKER)
                || record
                    .existing_version
                    .as_deref()
                    .is_some_and(|v| Dialect::from_version(v) == Dialect::MariaDb);
            if mariadb_dir {
                Dialect::MariaDb
            } else {
                Dialect::MySql
            }
        }
    }
}

pub struct DataDirSafetyGuard {
    services: Arc<dyn ServiceManager>,
    initializer: Arc<dyn DataDirInitializer>,
    selector: Arc<dyn Selector>,
    service_aliases: Vec<String>,
}

impl DataDirSafetyGuard {
    pub fn new(
        services: Arc<dyn ServiceManager>,
        initializer: Arc<dyn DataDirInitializer>,
        selector: Arc<dyn Selector>,
        service_aliases: Vec<String>,
    ) -> Self {
        DataDirSafetyGuard {
            services,
            initializer,
            selector,
            service_aliases,
        }
    }

    // 保证 data_dir 可被 target_version 启动, 否则返回 SafetyConflict
    pub async fn ensure_compatible(&self, data_dir: &Path, target_version: &str) -> Result<GuardOutcome> {
        let (conflict, record) = check_compatibility(data_dir, target_version);
        if !conflict {
            debug!("{} compatible with {}", data_dir.display(), target_version);
            return Ok(GuardOutcome::Compatible(record));
        }

        let existing = record.existing_version.clone().unwrap_or_default();
        warn!(
            "{} was written by {}, refusing to start {} on it",
            data_dir.display(),
            existing,
            target_version
        );
        let prompt = format!(
            "Data directory {} holds {} data. Move it aside and initialize a fresh one for {}?",
            data_dir.display(),
            existing,
            target_version
        );
        if !self.selector.confirm(&prompt)? {
            return Err(Error::SafetyConflict {
                data_dir: data_dir.to_path_buf(),
                existing,
                target: target_version.to_string(),
            });
        }

        let backup_path = self.remediate(data_dir, &record).await?;
        Ok(GuardOutcome::Remediated { record, backup_path })
    }

    async fn remediate(&self, data_dir: &Path, record: &DataDirVersionRecord) -> Result<PathBuf> {
        // 服务可能已停止, 忽略失败
        for alias in &self.service_aliases {
            match self.services.stop(alias).await {
                Ok(()) => info!("stopped service {}", alias),
                Err(e) => debug!("stopping {} ignored: {}", alias, e),
            }
        }

        let backup_path = backup_path_for(data_dir, &timestamp());
        if backup_path.exists() {
            return Err(Error::config(format!(
                "backup path {} already exists",
                backup_path.display()
            )));
        }
        fs::rename(data_dir, &backup_path)?;
        info!("moved {} to {}", data_dir.display(), backup_path.display());

        let dialect = target_dialect(record);
        if let Err(e) = self
            .initializer
            .initialize(data_dir, &record.target_version, dialect)
            .await
        {
            warn!("initializing {} failed: {}", data_dir.display(), e);
            return Err(roll_back(data_dir, &backup_path, e));
        }
        info!(
            "initialized {} for {} {}",
            data_dir.display(),
            dialect,
            record.target_version
        );
        Ok(backup_path)
    }
}

// 初始化失败: 删掉半成品目录, 把原目录移回
fn roll_back(data_dir: &Path, backup_path: &Path, cause: Error) -> Error {
    if data_dir.exists() {
        if let Err(e) = fs::remove_dir_all(data_dir) {
            return Error::config(format!(
                "{}; partial {} could not be removed ({}), original data is at {}",
                cause,
                data_dir.display(),
                e,
                backup_path.display()
            ));
        }
    }
    match fs::rename(backup_path, data_dir) {
        Ok(()) => {
            info!("restored {} from {}", data_dir.display(), backup_path.display());
            cause
        }
        Err(e) => Error::config(format!(
            "{}; original data left at {} ({})",
            cause,
            backup_path.display(),
            e
        )),
    }
}

// <data_dir>.bak.<stamp>, 与原目录同级
pub fn backup_path_for(data_dir: &Path, stamp: &str) -> PathBuf {
    let mut name = data_dir
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "datadir".into());
    name.push(format!(".bak.{}", stamp));
    data_dir.with_file_name(name)
}
