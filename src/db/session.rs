// 服务器级只读会话, 用于采集复制一致性信息

use async_trait::async_trait;
use sqlx::{Connection, Executor, MySqlConnection};

use crate::db::dialect::is_read_only;
use crate::db::mysql_db::{self, column_text, row_texts};
use crate::error::{Error, Result};
use crate::model::profile::ConnectionProfile;

/// Read-only queries the capture needs from a live server.
#[async_trait]
pub trait ServerSession: Send {
    /// `SELECT VERSION()`.
    async fn version(&mut self) -> Result<String>;

    /// Global variable value, `None` when the server does not know the variable.
    async fn global_variable(&mut self, name: &str) -> Result<Option<String>>;

    /// First row of a `SHOW ...` statement, every column as text.
    async fn show_row(&mut self, statement: &str) -> Result<Option<Vec<Option<String>>>>;

    /// `BINLOG_GTID_POS`-style lookup taking (file, position).
    async fn binlog_gtid_pos(&mut self, statement: &str, file: &str, position: u64)
    -> Result<Option<String>>;
}

pub struct MysqlSession {
    conn: MySqlConnection,
}

impl MysqlSession {
    /// Connects without selecting a database.
    pub async fn open(profile: &ConnectionProfile) -> Result<Self> {
        let conn = mysql_db::connect(&profile.server_level()).await?;
        Ok(MysqlSession { conn })
    }

    pub async fn close(self) -> Result<()> {
        self.conn.close().await?;
        Ok(())
    }
}

fn ensure_read_only(sql: &str) -> Result<()> {
    if is_read_only(sql) {
        Ok(())
    } else {
        Err(Error::Capture(format!("refusing non read-only statement: {}", sql)))
    }
}

// 变量名只来自内部常量表
fn valid_variable_name(name: &str) -> bool {
    !name.is_empty() && name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_')
}

// LIKE 中 _ 是通配符, gtid_mode 不能匹配到 gtidXmode
fn like_exact(name: &str) -> String {
    name.replace('_', "\\_")
}

#[async_trait]
impl ServerSession for MysqlSession {
    async fn version(&mut self) -> Result<String> {
        let row: (String,) = sqlx::query_as("SELECT VERSION()")
            .fetch_one(&mut self.conn)
            .await?;
        Ok(row.0)
    }

    async fn global_variable(&mut self, name: &str) -> Result<Option<String>> {
        if !valid_variable_name(name) {
            return Err(Error::Capture(format!("invalid variable name `{}`", name)));
        }
        let sql = format!("SHOW GLOBAL VARIABLES LIKE '{}'", like_exact(name));
        // raw_sql 的 fetch_optional 在空结果时报 RowNotFound
        let rows = (&mut self.conn).fetch_all(sqlx::raw_sql(&sql)).await?;
        Ok(rows
            .iter()
            .find(|r| column_text(r, 0).is_some_and(|n| n.eq_ignore_ascii_case(name)))
            .and_then(|r| column_text(r, 1)))
    }

    async fn show_row(&mut self, statement: &str) -> Result<Option<Vec<Option<String>>>> {
        ensure_read_only(statement)?;
        let rows = (&mut self.conn).fetch_all(sqlx::raw_sql(statement)).await?;
        Ok(rows.first().map(row_texts))
    }

    async fn binlog_gtid_pos(
        &mut self,
        statement: &str,
        file: &str,
        position: u64,
    ) -> Result<Option<String>> {
        ensure_read_only(statement)?;
        let row = sqlx::query(statement)
            .bind(file)
            .bind(position)
            .fetch_optional(&mut self.conn)
            .await?;
        Ok(row.and_then(|r| column_text(&r, 0)).filter(|s| !s.is_empty()))
    }
}
