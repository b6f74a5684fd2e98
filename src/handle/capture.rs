// 复制一致性信息采集 (只读)

use tracing::{info, warn};

use crate::db::dialect::{self, DialectQueries};
use crate::db::session::{MysqlSession, ServerSession};
use crate::error::{Error, Result};
use crate::model::profile::ConnectionProfile;
use crate::model::replication::{Dialect, ReplicationIdentity};

// 以服务器级连接采集复制信息; 只有连接本身会失败, 子查询尽力而为
pub async fn capture_server(profile: &ConnectionProfile) -> Result<ReplicationIdentity> {
    let mut session = MysqlSession::open(profile).await?;
    let identity = get_replication_identity(&mut session).await;
    if let Err(e) = session.close().await {
        warn!("closing capture session: {}", e);
    }
    info!(
        "captured {} identity of {}: gtid={} binlog={:?}:{:?}",
        identity.dialect, profile, identity.gtid_enabled, identity.binlog_file, identity.binlog_position
    );
    Ok(identity)
}

// 在已打开的会话上采集
pub async fn get_replication_identity<S>(session: &mut S) -> ReplicationIdentity
where
    S: ServerSession + ?Sized,
{
    let mut warnings = Vec::new();

    let version = match session.version().await {
        Ok(v) => Some(v),
        Err(e) => {
            record(&mut warnings, "server version", e);
            None
        }
    };
    let dialect = version
        .as_deref()
        .map(Dialect::from_version)
        .unwrap_or(Dialect::MySql);
    let queries = dialect::queries(dialect);

    let mut identity = ReplicationIdentity::empty(dialect);
    identity.server.version = version;
    identity.server.server_id = read_variable(session, "server_id", &mut warnings).await;
    identity.server.hostname = read_variable(session, "hostname", &mut warnings).await;
    if let Some(var) = queries.server_uuid_var {
        identity.server.server_uuid = read_variable(session, var, &mut warnings).await;
    }

    identity.gtid_enabled = gtid_enabled(session, dialect, queries, &mut warnings).await;
    identity.executed_set = read_variable(session, queries.executed_var, &mut warnings)
        .await
        .filter(|s| !s.is_empty());
    identity.purged_set = read_variable(session, queries.purged_var, &mut warnings)
        .await
        .filter(|s| !s.is_empty());

    // binlog 位置与 GTID 无关, 单独采集
    if let Some((file, position)) = binlog_coordinates(session, queries, &mut warnings).await {
        identity.binlog_file = Some(file);
        identity.binlog_position = position;
    }

    if let (Some(stmt), Some(file), Some(position)) = (
        queries.binlog_gtid_pos,
        identity.binlog_file.as_deref(),
        identity.binlog_position,
    ) {
        match session.binlog_gtid_pos(stmt, file, position).await {
            Ok(pos) => identity.binlog_gtid_position = pos,
            Err(e) => record(&mut warnings, "binlog gtid position", e),
        }
    }

    identity.warnings = warnings;
    identity
}

async fn gtid_enabled<S>(
    session: &mut S,
    dialect: Dialect,
    queries: &DialectQueries,
    warnings: &mut Vec<String>,
) -> bool
where
    S: ServerSession + ?Sized,
{
    match dialect {
        // 旧版本没有 gtid_mode 变量, 视为未开启
        Dialect::MySql => {
            let mut enabled = true;
            for var in queries.gtid_enabled_vars {
                let value = read_variable(session, var, warnings).await;
                enabled &= value.is_some_and(|v| v.eq_ignore_ascii_case("ON"));
            }
            enabled
        }
        Dialect::MariaDb => {
            let mut readable = true;
            for var in queries.gtid_enabled_vars {
                readable &= read_variable(session, var, warnings).await.is_some();
            }
            readable
        }
    }
}

async fn binlog_coordinates<S>(
    session: &mut S,
    queries: &DialectQueries,
    warnings: &mut Vec<String>,
) -> Option<(String, Option<u64>)>
where
    S: ServerSession + ?Sized,
{
    let mut last_error = None;
    for stmt in queries.master_status {
        match session.show_row(stmt).await {
            Ok(Some(row)) => return parse_status_row(&row, warnings),
            // binlog 未开启
            Ok(None) => return None,
            Err(e) => last_error = Some(e),
        }
    }
    if let Some(e) = last_error {
        record(warnings, "binlog position", e);
    }
    None
}

// 兼容 2 列 (File, Position) 和 4/5 列的状态结果
fn parse_status_row(row: &[Option<String>], warnings: &mut Vec<String>) -> Option<(String, Option<u64>)> {
    if row.len() < 2 {
        record(
            warnings,
            "binlog position",
            Error::Capture(format!("unexpected status row with {} column(s)", row.len())),
        );
        return None;
    }
    let file = row[0].clone().filter(|f| !f.is_empty())?;
    let position = row[1].as_deref().and_then(|p| p.trim().parse::<u64>().ok());
    if position.is_none() {
        record(
            warnings,
            "binlog position",
            Error::Capture(format!("unparseable position {:?}", row[1])),
        );
    }
    Some((file, position))
}

async fn read_variable<S>(session: &mut S, name: &str, warnings: &mut Vec<String>) -> Option<String>
where
    S: ServerSession + ?Sized,
{
    match session.global_variable(name).await {
        Ok(value) => value,
        Err(e) => {
            record(warnings, name, e);
            None
        }
    }
}

fn record(warnings: &mut Vec<String>, field: &str, err: Error) {
    let message = format!("{}: {}", field, err);
    warn!("capture skipped {}", message);
    warnings.push(message);
}
