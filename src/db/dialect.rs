//! Per-dialect statement and variable names.
//!
//! Call sites dispatch through [`queries`] instead of matching on version
//! strings themselves.

use crate::model::replication::Dialect;

#[derive(Debug)]
pub struct DialectQueries {
    /// Variables that must all be readable (and, for MySQL, `ON`) for GTID support.
    pub gtid_enabled_vars: &'static [&'static str],
    pub executed_var: &'static str,
    pub purged_var: &'static str,
    /// Master-status equivalents, tried in order until one succeeds.
    pub master_status: &'static [&'static str],
    /// Maps a binlog coordinate to a GTID position. MariaDB only.
    pub binlog_gtid_pos: Option<&'static str>,
    pub server_uuid_var: Option<&'static str>,
    /// `mysqldump` accepts `--set-gtid-purged`.
    pub dump_set_gtid_purged: bool,
}

static MYSQL: DialectQueries = DialectQueries {
    gtid_enabled_vars: &["gtid_mode"],
    executed_var: "gtid_executed",
    purged_var: "gtid_purged",
    master_status: &["SHOW MASTER STATUS", "SHOW BINARY LOG STATUS"],
    binlog_gtid_pos: None,
    server_uuid_var: Some("server_uuid"),
    dump_set_gtid_purged: true,
};

static MARIADB: DialectQueries = DialectQueries {
    gtid_enabled_vars: &["gtid_domain_id", "gtid_current_pos"],
    executed_var: "gtid_binlog_pos",
    purged_var: "gtid_slave_pos",
    master_status: &["SHOW MASTER STATUS", "SHOW BINLOG STATUS"],
    binlog_gtid_pos: Some("SELECT BINLOG_GTID_POS(?, ?)"),
    server_uuid_var: None,
    dump_set_gtid_purged: false,
};

pub fn queries(dialect: Dialect) -> &'static DialectQueries {
    match dialect {
        Dialect::MySql => &MYSQL,
        Dialect::MariaDb => &MARIADB,
    }
}

/// Statements the capture path may issue. Anything else has side effects.
pub fn is_read_only(sql: &str) -> bool {
    let head = sql.trim_start().to_ascii_uppercase();
    head.starts_with("SELECT ") || head.starts_with("SHOW ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_mariadb_maps_binlog_to_gtid() {
        assert!(queries(Dialect::MySql).binlog_gtid_pos.is_none());
        assert!(queries(Dialect::MariaDb).binlog_gtid_pos.is_some());
    }

    #[test]
    fn every_capture_statement_is_read_only() {
        for dialect in [Dialect::MySql, Dialect::MariaDb] {
            let q = queries(dialect);
            for stmt in q.master_status {
                assert!(is_read_only(stmt), "{}", stmt);
            }
            if let Some(stmt) = q.binlog_gtid_pos {
                assert!(is_read_only(stmt));
            }
        }
        assert!(!is_read_only("FLUSH TABLES WITH READ LOCK"));
        assert!(!is_read_only("SET GLOBAL gtid_mode = ON"));
    }
}
