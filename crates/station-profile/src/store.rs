use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::info;

use crate::profile::Profile;

/// A pilot profile on disk.
#[derive(Debug, Clone)]
pub struct ProfileStore {
    path: PathBuf,
}

impl ProfileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    pub fn load(&self) -> Result<Profile> {
        let doc = fs::read_to_string(&self.path).with_context(|| format!("read profile {}", self.path.display()))?;
        Profile::from_xml(&doc).with_context(|| format!("parse profile {}", self.path.display()))
    }

    /// Missing file reads as the default profile.
    pub fn load_or_default(&self) -> Result<Profile> {
        if self.exists() {
            self.load()
        } else {
            info!(path = %self.path.display(), "no profile yet, using defaults");
            Ok(Profile::default())
        }
    }

    /// Write through a sibling temp file so a crash never leaves half a profile.
    pub fn save(&self, profile: &Profile) -> Result<()> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
        }
        let doc = profile.to_xml()?;
        let tmp = self.path.with_extension("xml.tmp");
        fs::write(&tmp, doc).with_context(|| format!("write {}", tmp.display()))?;
        fs::rename(&tmp, &self.path).with_context(|| format!("replace {}", self.path.display()))?;
        info!(path = %self.path.display(), "profile saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::Theme;
    use station_control::{ActuatorConfig, Slot};

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProfileStore::new(dir.path().join("pilots").join("alex.xml"));
        assert!(!store.exists());
        assert_eq!(store.load_or_default().unwrap(), Profile::default());

        let mut p = Profile { theme: Theme::Dark, actuators: ActuatorConfig::with_count(3), ..Profile::default() };
        p.keybindings.set_actuator_count(3);
        p.thrusters.assign_slot(5, Some(Slot::A));
        store.save(&p).unwrap();

        assert!(store.exists());
        assert!(!store.path().with_extension("xml.tmp").exists());
        assert_eq!(store.load().unwrap(), p);
    }

    #[test]
    fn corrupt_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.xml");
        fs::write(&path, "<root><theme>").unwrap();
        let err = ProfileStore::new(&path).load().unwrap_err();
        assert!(format!("{err:#}").contains("bad.xml"));
    }
}
