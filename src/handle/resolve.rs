// 连接参数解析, 先匹配先用:
// 1. 指定的加密配置文件 (任何失败都是致命错误)
// 2. 命令行 host/port/user/password
// 3. 配置目录中保存的加密配置, 由 Selector 选择
// 4. 默认值 localhost:3306, root, 空密码

use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::{Error, Result};
use crate::handle::select::Selector;
use crate::model::profile::{ConnectionProfile, Provenance, DEFAULT_PORT, DEFAULT_USER};
use crate::util::profile_store::EncryptedConfigStore;

// 一端 (源或目标) 的原始输入
#[derive(Debug, Clone, Default)]
pub struct ConnectionArgs {
    pub config: Option<PathBuf>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub database: Option<String>,
    // 加密配置的口令, 通常来自环境变量
    pub passphrase: Option<String>,
}

impl ConnectionArgs {
    fn has_connection_flags(&self) -> bool {
        self.host.is_some() || self.port.is_some() || self.user.is_some() || self.password.is_some()
    }
}

pub struct ConfigResolver<'a> {
    selector: &'a dyn Selector,
    store: EncryptedConfigStore,
    profile_dir: Option<PathBuf>,
}

impl<'a> ConfigResolver<'a> {
    pub fn new(selector: &'a dyn Selector, profile_dir: Option<PathBuf>) -> Self {
        ConfigResolver {
            selector,
            store: EncryptedConfigStore,
            profile_dir,
        }
    }

    // role 只用于提示和日志
    pub fn resolve(&self, args: &ConnectionArgs, role: &str) -> Result<(ConnectionProfile, Provenance)> {
        let (mut profile, provenance) = if let Some(path) = &args.config {
            let profile = self.load_encrypted(path, args, role)?;
            (profile, Provenance::ConfigFile(path.clone()))
        } else if args.has_connection_flags() {
            (from_flags(args), Provenance::Flags)
        } else if let Some((path, profile)) = self.pick_discovered(args, role)? {
            (profile, Provenance::Discovered(path))
        } else {
            (ConnectionProfile::default(), Provenance::Defaults)
        };

        // 显式指定的库名覆盖配置中的库名
        if args.database.is_some() {
            profile.database = args.database.clone();
        }
        if profile.host.trim().is_empty() {
            return Err(Error::config(format!("{} host is empty", role)));
        }
        if profile.port == 0 {
            return Err(Error::config(format!("{} port must be non-zero", role)));
        }

        info!("{} connection {} resolved from {}", role, profile, provenance);
        Ok((profile, provenance))
    }

    fn load_encrypted(&self, path: &Path, args: &ConnectionArgs, role: &str) -> Result<ConnectionProfile> {
        let passphrase = self.passphrase(args, role, path)?;
        self.store.load(path, &passphrase)
    }

    fn passphrase(&self, args: &ConnectionArgs, role: &str, path: &Path) -> Result<String> {
        if let Some(p) = &args.passphrase {
            return Ok(p.clone());
        }
        self.selector
            .secret(&format!("passphrase for {} profile {}", role, path.display()))?
            .ok_or_else(|| {
                Error::config(format!(
                    "no passphrase for {} (set DBFERRY_{}_PASSPHRASE or DBFERRY_PASSPHRASE)",
                    path.display(),
                    role.to_ascii_uppercase()
                ))
            })
    }

    fn pick_discovered(
        &self,
        args: &ConnectionArgs,
        role: &str,
    ) -> Result<Option<(PathBuf, ConnectionProfile)>> {
        let Some(dir) = &self.profile_dir else {
            return Ok(None);
        };
        let found = self.store.discover(dir)?;
        if found.is_empty() {
            return Ok(None);
        }
        let labels: Vec<String> = found
            .iter()
            .map(|p| {
                p.file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_else(|| p.display().to_string())
            })
            .collect();
        let idx = self
            .selector
            .select_one(&format!("Select the {} connection profile:", role), &labels)?;
        let path = found
            .get(idx)
            .ok_or_else(|| Error::config(format!("profile index {} out of range", idx)))?
            .clone();
        let profile = self.load_encrypted(&path, args, role)?;
        Ok(Some((path, profile)))
    }
}

fn from_flags(args: &ConnectionArgs) -> ConnectionProfile {
    let defaults = ConnectionProfile::default();
    ConnectionProfile {
        host: args.host.clone().unwrap_or(defaults.host),
        port: args.port.unwrap_or(DEFAULT_PORT),
        user: args.user.clone().unwrap_or_else(|| DEFAULT_USER.to_string()),
        password: args.password.clone().unwrap_or_default(),
        database: None,
    }
}
