// 系统服务与数据目录初始化 (外部命令)

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::error::{Error, ExternalToolError, Result};
use crate::model::replication::Dialect;
use crate::util::exec::run_with_timeout;

#[async_trait]
pub trait ServiceManager: Send + Sync {
    async fn stop(&self, service: &str) -> std::result::Result<(), ExternalToolError>;
}

#[async_trait]
pub trait DataDirInitializer: Send + Sync {
    // 在 data_dir 建立空数据目录; dialect 决定使用哪个初始化工具
    async fn initialize(&self, data_dir: &Path, version: &str, dialect: Dialect) -> Result<()>;
}

// systemctl stop, 不可用时退回 service <name> stop
pub struct SystemServiceManager {
    timeout: Duration,
}

impl SystemServiceManager {
    pub fn new(timeout: Duration) -> Self {
        SystemServiceManager { timeout }
    }
}

#[async_trait]
impl ServiceManager for SystemServiceManager {
    async fn stop(&self, service: &str) -> std::result::Result<(), ExternalToolError> {
        let mut cmd = Command::new("systemctl");
        cmd.arg("stop").arg(service);
        match run_with_timeout("systemctl", cmd, self.timeout).await {
            Ok(_) => Ok(()),
            Err(ExternalToolError::Spawn { .. }) => {
                debug!("systemctl unavailable, trying service(8)");
                let mut cmd = Command::new("service");
                cmd.arg(service).arg("stop");
                run_with_timeout("service", cmd, self.timeout)
                    .await
                    .map(|_| ())
            }
            Err(e) => Err(e),
        }
    }
}

// MariaDB 用 mariadb-install-db, MySQL 用 mysqld --initialize-insecure
pub struct CommandInitializer {
    timeout: Duration,
    user: Option<String>,
}

impl CommandInitializer {
    pub fn new(timeout: Duration, user: Option<String>) -> Self {
        CommandInitializer { timeout, user }
    }

    fn command(&self, data_dir: &Path, dialect: Dialect) -> (String, Command) {
        let (program, init_flag) = match dialect {
            Dialect::MariaDb => ("mariadb-install-db", None),
            Dialect::MySql => ("mysqld", Some("--initialize-insecure")),
        };
        let mut cmd = Command::new(program);
        if let Some(flag) = init_flag {
            cmd.arg(flag);
        }
        cmd.arg(format!("--datadir={}", data_dir.display()));
        if let Some(user) = &self.user {
            cmd.arg(format!("--user={}", user));
        }
        (program.to_string(), cmd)
    }
}

#[async_trait]
impl DataDirInitializer for CommandInitializer {
    async fn initialize(&self, data_dir: &Path, version: &str, dialect: Dialect) -> Result<()> {
        let (program, cmd) = self.command(data_dir, dialect);
        debug!("initializing {} for {} with {}", data_dir.display(), version, program);
        // mysqld --initialize 要求目录为空或不存在
        if dialect == Dialect::MariaDb {
            std::fs::create_dir_all(data_dir)?;
        }
        run_with_timeout(&program, cmd, self.timeout).await?;
        Ok(())
    }
}

// 本机已安装的服务端版本 (mariadbd --version / mysqld --version)
pub async fn detect_installed_version(timeout: Duration) -> Result<String> {
    for program in ["mariadbd", "mysqld"] {
        let mut cmd = Command::new(program);
        cmd.arg("--version");
        match run_with_timeout(program, cmd, timeout).await {
            Ok(output) => {
                let text = String::from_utf8_lossy(&output.stdout);
                if let Some(version) = parse_version_banner(&text) {
                    return Ok(version);
                }
            }
            Err(e) => debug!("{}", e),
        }
    }
    Err(Error::config(
        "cannot detect the installed server version; pass --target-version",
    ))
}

// "mysqld  Ver 8.0.36 for Linux ..." -> "8.0.36"; MariaDB 保留 -MariaDB 后缀
pub fn parse_version_banner(banner: &str) -> Option<String> {
    let mut words = banner.split_whitespace();
    words.find(|w| *w == "Ver")?;
    let version = words.next()?.trim_end_matches(',');
    // 11.x: "mariadbd Ver 11.4.2-MariaDB"; 10.x: "mysqld Ver 10.6.16-MariaDB-0ubuntu"
    if version.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        Some(version.to_string())
    } else {
        None
    }
}
