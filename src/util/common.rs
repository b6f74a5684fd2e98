use std::{fs, path::Path};

use serde::Deserialize;
use tracing::debug;

use crate::error::{Error, Result};

// 载入toml配置
pub fn load_toml<T>(toml_path: &Path) -> Result<T>
where
    for<'de> T: Deserialize<'de>,
{
    debug!("loading config from {}", toml_path.display());
    let text = fs::read_to_string(toml_path)?;
    toml::from_str(&text).map_err(|e| {
        Error::config(format!("invalid config file {}: {}", toml_path.display(), e))
    })
}

// 载入toml配置, 文件不存在时使用默认值
pub fn load_toml_or_default<T>(toml_path: &Path) -> Result<T>
where
    for<'de> T: Deserialize<'de> + Default,
{
    if !toml_path.exists() {
        debug!("{} not found, using defaults", toml_path.display());
        return Ok(T::default());
    }
    load_toml(toml_path)
}

// 每行一个库名, 忽略空行, 保持顺序
pub fn parse_database_list(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn read_database_list(path: &Path) -> Result<Vec<String>> {
    let text = fs::read_to_string(path).map_err(|e| {
        Error::config(format!("cannot read database list {}: {}", path.display(), e))
    })?;
    Ok(parse_database_list(&text))
}

// 拆分逗号分隔的 --databases
pub fn split_database_arg(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn timestamp() -> String {
    chrono::Local::now().format("%Y%m%d_%H%M%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_drops_blank_lines_and_keeps_order() {
        assert_eq!(
            parse_database_list("db1\n\ndb2\n  \ndb3\n"),
            vec!["db1", "db2", "db3"]
        );
    }

    #[test]
    fn list_trims_surrounding_whitespace_and_crlf() {
        assert_eq!(parse_database_list("  shop \r\n\tcrm\r\n"), vec!["shop", "crm"]);
        assert!(parse_database_list("\n \n").is_empty());
    }

    #[test]
    fn database_arg_split() {
        assert_eq!(split_database_arg("a, b,,c "), vec!["a", "b", "c"]);
    }

    #[test]
    fn missing_toml_uses_default() {
        let dir = tempfile::tempdir().unwrap();
        let value: crate::model::settings::Settings =
            load_toml_or_default(&dir.path().join("absent.toml")).unwrap();
        assert!(value.backup.compress);
    }

    #[test]
    fn malformed_toml_is_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        fs::write(&path, "[backup\ndir = ").unwrap();
        let err = load_toml::<crate::model::settings::Settings>(&path).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }
}
