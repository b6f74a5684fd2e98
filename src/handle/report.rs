// 汇总与采集结果输出 (表格 / JSON)

use clap::ValueEnum;
use comfy_table::{Cell, Table};

use crate::handle::guard::GuardOutcome;
use crate::model::migration::MigrationSummary;
use crate::model::replication::ReplicationIdentity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// ASCII table format
    Table,
    /// JSON format
    Json,
}

pub fn render_summary(summary: &MigrationSummary, format: OutputFormat) -> String {
    match format {
        OutputFormat::Json => to_json(summary),
        OutputFormat::Table => {
            let mut table = Table::new();
            table.set_header(vec!["Database", "Status", "Duration", "Artifact", "Detail"]);
            for r in &summary.results {
                let detail = match &r.error {
                    Some(e) => e.clone(),
                    None => r.warnings.join("; "),
                };
                table.add_row(vec![
                    Cell::new(&r.source_db),
                    Cell::new(if r.success { "ok" } else { "FAILED" }),
                    Cell::new(format!("{:.1}s", r.duration.as_secs_f64())),
                    Cell::new(
                        r.backup_artifact
                            .as_ref()
                            .map(|p| p.display().to_string())
                            .unwrap_or_default(),
                    ),
                    Cell::new(detail),
                ]);
            }
            format!(
                "{}\n{} succeeded, {} failed, total {:.1}s",
                table,
                summary.success_count,
                summary.error_count,
                summary.total_duration.as_secs_f64()
            )
        }
    }
}

pub fn render_identity(identity: &ReplicationIdentity, format: OutputFormat) -> String {
    match format {
        OutputFormat::Json => to_json(identity),
        OutputFormat::Table => {
            let show = |v: &Option<String>| v.clone().unwrap_or_else(|| "-".to_string());
            let mut table = Table::new();
            table.set_header(vec!["Field", "Value"]);
            let rows: Vec<(&str, String)> = vec![
                ("dialect", identity.dialect.to_string()),
                ("version", show(&identity.server.version)),
                ("server_id", show(&identity.server.server_id)),
                ("server_uuid", show(&identity.server.server_uuid)),
                ("hostname", show(&identity.server.hostname)),
                ("gtid_enabled", identity.gtid_enabled.to_string()),
                ("executed_set", show(&identity.executed_set)),
                ("purged_set", show(&identity.purged_set)),
                ("binlog_file", show(&identity.binlog_file)),
                (
                    "binlog_position",
                    identity
                        .binlog_position
                        .map(|p| p.to_string())
                        .unwrap_or_else(|| "-".to_string()),
                ),
                ("binlog_gtid_position", show(&identity.binlog_gtid_position)),
            ];
            for (field, value) in rows {
                table.add_row(vec![field.to_string(), value]);
            }
            let mut out = table.to_string();
            for w in &identity.warnings {
                out.push_str(&format!("\nwarning: {}", w));
            }
            out
        }
    }
}

pub fn render_guard(outcome: &GuardOutcome) -> String {
    match outcome {
        GuardOutcome::Compatible(record) => match &record.existing_version {
            Some(existing) => format!(
                "data directory version {} is compatible with {}",
                existing, record.target_version
            ),
            None => format!(
                "no version marker found; assuming compatible with {}",
                record.target_version
            ),
        },
        GuardOutcome::Remediated { record, backup_path } => format!(
            "data directory from {} moved to {} and reinitialized for {}",
            record.existing_version.as_deref().unwrap_or("unknown"),
            backup_path.display(),
            record.target_version
        ),
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value)
        .unwrap_or_else(|e| format!("{{\"error\": \"serialization: {}\"}}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::migration::MigrationResult;
    use crate::model::replication::Dialect;
    use std::time::Duration;

    fn summary() -> MigrationSummary {
        let ok = MigrationResult {
            source_db: "shop".to_string(),
            target_db: "shop".to_string(),
            success: true,
            error: None,
            backup_artifact: None,
            target_backup_artifact: None,
            warnings: vec!["target backup skipped: unknown database".to_string()],
            duration: Duration::from_millis(1500),
        };
        let failed = MigrationResult {
            source_db: "crm".to_string(),
            success: false,
            error: Some("source backup failed: boom".to_string()),
            warnings: Vec::new(),
            ..ok.clone()
        };
        MigrationSummary::from_results(vec![ok, failed], Duration::from_secs(3))
    }

    #[test]
    fn table_lists_every_database() {
        let out = render_summary(&summary(), OutputFormat::Table);
        assert!(out.contains("shop"));
        assert!(out.contains("FAILED"));
        assert!(out.contains("source backup failed: boom"));
        assert!(out.contains("1 succeeded, 1 failed"));
    }

    #[test]
    fn json_summary_has_counts() {
        let json: serde_json::Value =
            serde_json::from_str(&render_summary(&summary(), OutputFormat::Json)).unwrap();
        assert_eq!(json["success_count"], 1);
        assert_eq!(json["error_count"], 1);
        assert_eq!(json["databases"][1], "crm");
    }

    #[test]
    fn identity_table_shows_warnings() {
        let mut identity = ReplicationIdentity::empty(Dialect::MariaDb);
        identity.warnings.push("gtid_slave_pos: denied".to_string());
        let out = render_identity(&identity, OutputFormat::Table);
        assert!(out.contains("MariaDB"));
        assert!(out.contains("warning: gtid_slave_pos: denied"));
    }
}
