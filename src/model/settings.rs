// 工具配置
// 配置文件为toml格式, 默认路径: ./dbferry.toml

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Settings {
    pub backup: BackupSettings,
    pub timeouts: Timeouts,
    pub binaries: Binaries,
    pub profiles: ProfileSettings,
    pub datadir: DataDirSettings,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct BackupSettings {
    pub dir: PathBuf,
    pub compress: bool,
    pub encrypt: bool,
    pub retention_days: u32,
    pub checksum: bool,
}

impl Default for BackupSettings {
    fn default() -> Self {
        BackupSettings {
            dir: PathBuf::from("backups"),
            compress: true,
            encrypt: false,
            retention_days: 0,
            checksum: true,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Timeouts {
    pub dump_secs: u64,
    pub restore_secs: u64,
    pub service_secs: u64,
    pub init_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Timeouts {
            dump_secs: 3600,
            restore_secs: 3600,
            service_secs: 60,
            init_secs: 600,
        }
    }
}

impl Timeouts {
    pub fn dump(&self) -> Duration {
        Duration::from_secs(self.dump_secs)
    }

    pub fn restore(&self) -> Duration {
        Duration::from_secs(self.restore_secs)
    }

    pub fn service(&self) -> Duration {
        Duration::from_secs(self.service_secs)
    }

    pub fn init(&self) -> Duration {
        Duration::from_secs(self.init_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Binaries {
    pub mysqldump: String,
    pub mysql: String,
}

impl Default for Binaries {
    fn default() -> Self {
        Binaries {
            mysqldump: "mysqldump".to_string(),
            mysql: "mysql".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct ProfileSettings {
    /// Falls back to `<config dir>/dbferry/profiles`.
    pub dir: Option<PathBuf>,
}

impl ProfileSettings {
    pub fn resolved_dir(&self) -> Option<PathBuf> {
        self.dir
            .clone()
            .or_else(|| dirs::config_dir().map(|d| d.join("dbferry").join("profiles")))
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DataDirSettings {
    pub services: Vec<String>,
    /// OS account passed to the initializer as `--user`.
    pub user: Option<String>,
}

impl Default for DataDirSettings {
    fn default() -> Self {
        DataDirSettings {
            services: vec![
                "mariadb".to_string(),
                "mysql".to_string(),
                "mysqld".to_string(),
            ],
            user: None,
        }
    }
}
