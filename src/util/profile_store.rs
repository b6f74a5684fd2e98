// 加密的连接配置文件

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::model::profile::ConnectionProfile;
use crate::util::crypto;

pub const PROFILE_EXTENSION: &str = "enc";

#[derive(Debug, Clone, Default)]
pub struct EncryptedConfigStore;

impl EncryptedConfigStore {
    pub fn load(&self, path: &Path, passphrase: &str) -> Result<ConnectionProfile> {
        let sealed = fs::read(path).map_err(|e| {
            Error::config(format!("cannot read profile {}: {}", path.display(), e))
        })?;
        let plain = crypto::open(passphrase, &sealed)
            .map_err(|e| Error::Crypto(format!("{}: {}", path.display(), e)))?;
        let text = String::from_utf8(plain)
            .map_err(|_| Error::Crypto(format!("{}: profile is not utf-8", path.display())))?;
        let profile = toml::from_str(&text)
            .map_err(|e| Error::config(format!("invalid profile {}: {}", path.display(), e)))?;
        debug!("loaded profile {}", path.display());
        Ok(profile)
    }

    pub fn save(&self, path: &Path, profile: &ConnectionProfile, passphrase: &str) -> Result<()> {
        let text = toml::to_string(profile)
            .map_err(|e| Error::config(format!("cannot encode profile: {}", e)))?;
        let sealed = crypto::seal(passphrase, text.as_bytes())?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, sealed)?;
        info!("saved profile {} to {}", profile, path.display());
        Ok(())
    }

    // dir 下的 *.enc 文件, 按文件名排序; 目录不存在时为空
    pub fn discover(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut found = fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file())
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some(PROFILE_EXTENSION))
            .collect::<Vec<_>>();
        found.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ConnectionProfile {
        ConnectionProfile {
            host: "db.internal".to_string(),
            port: 3307,
            user: "ops".to_string(),
            password: "s3cret".to_string(),
            database: Some("shop".to_string()),
        }
    }

    #[test]
    fn saved_profile_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("prod.enc");
        let store = EncryptedConfigStore;
        store.save(&path, &sample(), "pw").unwrap();

        let raw = fs::read(&path).unwrap();
        assert!(crypto::is_sealed(&raw));
        assert!(!String::from_utf8_lossy(&raw).contains("s3cret"));
        assert_eq!(store.load(&path, "pw").unwrap(), sample());
    }

    #[test]
    fn wrong_passphrase_is_crypto_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prod.enc");
        let store = EncryptedConfigStore;
        store.save(&path, &sample(), "pw").unwrap();
        assert!(matches!(store.load(&path, "nope"), Err(Error::Crypto(_))));
    }

    #[test]
    fn discovery_is_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["zeta.enc", "alpha.enc", "notes.txt"] {
            fs::write(dir.path().join(name), b"x").unwrap();
        }
        let found = EncryptedConfigStore.discover(dir.path()).unwrap();
        let names: Vec<_> = found
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["alpha.enc", "zeta.enc"]);
        assert!(EncryptedConfigStore
            .discover(&dir.path().join("missing"))
            .unwrap()
            .is_empty());
    }
}
