// 连接配置

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 3306;
pub const DEFAULT_USER: &str = "root";

/// Resolved connection parameters for one server. Immutable once resolved.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionProfile {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_user")]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub database: Option<String>,
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_user() -> String {
    DEFAULT_USER.to_string()
}

impl Default for ConnectionProfile {
    fn default() -> Self {
        ConnectionProfile {
            host: default_host(),
            port: DEFAULT_PORT,
            user: default_user(),
            password: String::new(),
            database: None,
        }
    }
}

impl ConnectionProfile {
    /// Copy of this profile pointed at `database`.
    pub fn with_database(&self, database: &str) -> Self {
        ConnectionProfile {
            database: Some(database.to_string()),
            ..self.clone()
        }
    }

    /// Copy of this profile with no default database (server-level session).
    pub fn server_level(&self) -> Self {
        ConnectionProfile {
            database: None,
            ..self.clone()
        }
    }

    /// True when both profiles address the same server endpoint.
    pub fn same_server(&self, other: &ConnectionProfile) -> bool {
        self.host.eq_ignore_ascii_case(&other.host) && self.port == other.port
    }
}

// 密码不输出
impl fmt::Debug for ConnectionProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionProfile")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &if self.password.is_empty() { "" } else { "***" })
            .field("database", &self.database)
            .finish()
    }
}

impl fmt::Display for ConnectionProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.user, self.host, self.port)?;
        if let Some(db) = &self.database {
            write!(f, "/{}", db)?;
        }
        Ok(())
    }
}

/// Which resolution tier produced a profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Provenance {
    /// Explicit encrypted configuration file.
    ConfigFile(PathBuf),
    /// Individual connection flags.
    Flags,
    /// Encrypted profile picked from the profile directory.
    Discovered(PathBuf),
    /// Compiled-in defaults.
    Defaults,
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provenance::ConfigFile(path) => write!(f, "config file {}", path.display()),
            Provenance::Flags => write!(f, "command-line flags"),
            Provenance::Discovered(path) => write!(f, "saved profile {}", path.display()),
            Provenance::Defaults => write!(f, "built-in defaults"),
        }
    }
}
