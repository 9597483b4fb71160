//! JSON file profile store

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tr_core::model::validate_id;
use tr_core::storage::{PlayerProfile, ProfileStore};

/// One `<player>.json` file per profile
#[derive(Debug, Clone)]
pub struct FileProfileStore {
    dir: PathBuf,
}

impl FileProfileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).with_context(|| format!("creating profile directory {}", dir.display()))?;
        Ok(Self { dir })
    }

    /// `<data dir>/tractor-royale/profiles`
    pub fn default_location() -> Result<Self> {
        let base = dirs::data_dir().context("no user data directory on this platform")?;
        Self::new(base.join("tractor-royale").join("profiles"))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, player_id: &str) -> Result<PathBuf> {
        validate_id(player_id)?;
        Ok(self.dir.join(format!("{player_id}.json")))
    }
}

impl ProfileStore for FileProfileStore {
    fn load(&self, player_id: &str) -> Result<Option<PlayerProfile>> {
        let path = self.path_for(player_id)?;
        if !path.exists() {
            return Ok(None);
        }
        let text = fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
        let profile = serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
        Ok(Some(profile))
    }

    fn save(&self, profile: &PlayerProfile) -> Result<()> {
        let path = self.path_for(&profile.player_id)?;
        let tmp = path.with_extension("json.tmp");
        let text = serde_json::to_string_pretty(profile)?;
        fs::write(&tmp, text).with_context(|| format!("writing {}", tmp.display()))?;
        fs::rename(&tmp, &path).with_context(|| format!("replacing {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tr_core::storage::RaceRecord;

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileProfileStore::new(dir.path().join("profiles")).unwrap();

        let mut profile = PlayerProfile::new("farmer_1", "Farmer One");
        profile.record_race(RaceRecord {
            placement: Some(2),
            distance: 100.0,
            finish_time: Some(31.25),
        });
        store.save(&profile).unwrap();

        let loaded = store.load("farmer_1").unwrap().unwrap();
        assert_eq!(loaded, profile);
    }

    #[test]
    fn test_missing_profile_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileProfileStore::new(dir.path()).unwrap();
        assert!(store.load("ghost").unwrap().is_none());
    }

    #[test]
    fn test_rejects_path_like_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileProfileStore::new(dir.path()).unwrap();
        assert!(store.load("../etc/passwd").is_err());
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileProfileStore::new(dir.path()).unwrap();
        fs::write(dir.path().join("broken.json"), "{ nope").unwrap();
        assert!(store.load("broken").is_err());
    }
}
