//! Session persistence in `session.<provider>.json`
//!
//! One file per identity provider, so switching backends never hands one
//! provider's tokens to another.

use std::fs;
use std::path::{Path, PathBuf};

use crate::domain::result::Result;
use crate::domain::Session;

/// Reads and writes the persisted session of one identity provider
#[derive(Debug, Clone)]
pub struct SessionFile {
    path: PathBuf,
}

impl SessionFile {
    pub fn new(smartmark_dir: &Path, provider: &str) -> Self {
        Self {
            path: smartmark_dir.join(format!("session.{}.json", provider)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The stored session, or `None` if nothing has been saved
    pub fn load(&self) -> Result<Option<Session>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&self.path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    pub fn save(&self, session: &Session) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_json::to_string_pretty(session)?)?;
        Ok(())
    }

    /// Remove the stored session; a missing file is fine
    pub fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
