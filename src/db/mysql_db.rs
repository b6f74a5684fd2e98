use sqlx::mysql::{MySqlConnectOptions, MySqlRow};
use sqlx::{Column, Connection, MySqlConnection, Row};
use tracing::debug;

use crate::error::Result;
use crate::model::profile::ConnectionProfile;

// 每次操作单独建立连接, 用完即关, 不共享连接池
pub async fn connect(profile: &ConnectionProfile) -> Result<MySqlConnection> {
    let mut options = MySqlConnectOptions::new()
        .host(&profile.host)
        .port(profile.port)
        .username(&profile.user)
        .password(&profile.password);
    if let Some(db) = &profile.database {
        options = options.database(db);
    }
    debug!("connecting to {}", profile);
    Ok(MySqlConnection::connect_with(&options).await?)
}

/// Column `idx` rendered as text, whatever its wire type.
pub fn column_text(row: &MySqlRow, idx: usize) -> Option<String> {
    if let Ok(v) = row.try_get::<Option<String>, _>(idx) {
        return v;
    }
    if let Ok(v) = row.try_get::<Option<Vec<u8>>, _>(idx) {
        return v.map(|b| String::from_utf8_lossy(&b).into_owned());
    }
    if let Ok(v) = row.try_get::<Option<u64>, _>(idx) {
        return v.map(|n| n.to_string());
    }
    if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
        return v.map(|n| n.to_string());
    }
    None
}

/// Every column of `row` as text.
pub fn row_texts(row: &MySqlRow) -> Vec<Option<String>> {
    row.columns()
        .iter()
        .map(|c| column_text(row, c.ordinal()))
        .collect()
}

/// Backtick-quote an identifier for statements that cannot be parameterised.
pub fn quote_ident(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// Single-quote a string literal for statements that cannot be parameterised.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers_escape_backticks() {
        assert_eq!(quote_ident("shop"), "`shop`");
        assert_eq!(quote_ident("we`ird"), "`we``ird`");
    }

    #[test]
    fn literals_escape_quotes_and_backslashes() {
        assert_eq!(quote_literal("app"), "'app'");
        assert_eq!(quote_literal("o'neil\\"), "'o''neil\\\\'");
    }
}
