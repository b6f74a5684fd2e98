// 复制一致性信息

use std::fmt;

use serde::Serialize;

/// Closed set of server flavors. Resolved once per connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Dialect {
    MySql,
    MariaDb,
}

impl Dialect {
    /// Case-insensitive "mariadb" match on the `VERSION()` string.
    pub fn from_version(version: &str) -> Dialect {
        if version.to_ascii_lowercase().contains("mariadb") {
            Dialect::MariaDb
        } else {
            Dialect::MySql
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dialect::MySql => write!(f, "MySQL"),
            Dialect::MariaDb => write!(f, "MariaDB"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ServerIdentity {
    pub version: Option<String>,
    pub server_id: Option<String>,
    pub server_uuid: Option<String>,
    pub hostname: Option<String>,
}

/// Read-only snapshot of a server's replication position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplicationIdentity {
    pub dialect: Dialect,
    pub gtid_enabled: bool,
    pub executed_set: Option<String>,
    pub purged_set: Option<String>,
    pub binlog_file: Option<String>,
    pub binlog_position: Option<u64>,
    /// MariaDB only: GTID position equivalent to the binlog coordinate.
    pub binlog_gtid_position: Option<String>,
    pub server: ServerIdentity,
    /// Sub-queries that failed; their fields are left empty.
    pub warnings: Vec<String>,
}

impl ReplicationIdentity {
    pub fn empty(dialect: Dialect) -> Self {
        ReplicationIdentity {
            dialect,
            gtid_enabled: false,
            executed_set: None,
            purged_set: None,
            binlog_file: None,
            binlog_position: None,
            binlog_gtid_position: None,
            server: ServerIdentity::default(),
            warnings: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dialect_from_version_string() {
        assert_eq!(Dialect::from_version("10.6.23-MariaDB-log"), Dialect::MariaDb);
        assert_eq!(Dialect::from_version("5.5.5-10.11.2-mariadb"), Dialect::MariaDb);
        assert_eq!(Dialect::from_version("8.0.36"), Dialect::MySql);
        assert_eq!(Dialect::from_version(""), Dialect::MySql);
    }
}
