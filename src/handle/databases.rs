// 待迁移库列表

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::info;

use crate::error::{Error, Result};
use crate::handle::select::Selector;
use crate::model::profile::ConnectionProfile;
use crate::util::common::read_database_list;

pub const SYSTEM_DATABASES: [&str; 4] = ["information_schema", "performance_schema", "mysql", "sys"];

pub fn is_system_database(name: &str) -> bool {
    SYSTEM_DATABASES.iter().any(|s| s.eq_ignore_ascii_case(name))
}

// 列出服务器上的用户库
#[async_trait]
pub trait DatabaseCatalog: Send + Sync {
    async fn list_databases(&self, profile: &ConnectionProfile) -> Result<Vec<String>>;
}

// 库名来源, 按优先级
#[derive(Debug, Clone, Default)]
pub struct DatabaseListSource {
    pub explicit: Vec<String>,
    pub file: Option<PathBuf>,
    pub all: bool,
}

pub async fn resolve_database_list(
    source: &DatabaseListSource,
    catalog: &dyn DatabaseCatalog,
    selector: &dyn Selector,
    profile: &ConnectionProfile,
) -> Result<Vec<String>> {
    let names = if !source.explicit.is_empty() {
        source.explicit.clone()
    } else if let Some(path) = &source.file {
        let names = read_database_list(path)?;
        info!("read {} database name(s) from {}", names.len(), path.display());
        names
    } else if source.all {
        catalog.list_databases(profile).await?
    } else {
        let available = catalog.list_databases(profile).await?;
        let picked = selector.select_many("Select databases to migrate:", &available)?;
        picked
            .into_iter()
            .filter_map(|i| available.get(i).cloned())
            .collect()
    };

    if names.is_empty() {
        return Err(Error::config(
            "no databases to migrate (use --databases, --database-file or --all-databases)",
        ));
    }
    Ok(names)
}
