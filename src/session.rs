//! Process-scoped conversation identity.
//!
//! The ids are generated once, persisted as JSON and reloaded on every start so
//! the completion service sees the same session across restarts.

use crate::error::{AvatalkError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Identity used to scope completion requests. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    session_id: String,
    user_id: String,
}

impl Session {
    /// Load the persisted identity at `path`, or generate and persist a new one.
    pub fn load_or_create(path: &Path) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(contents) => {
                let session: Session = serde_json::from_str(&contents)?;
                if session.session_id.is_empty() || session.user_id.is_empty() {
                    return Err(AvatalkError::Session {
                        message: format!("{} holds an empty identifier", path.display()),
                    });
                }
                tracing::debug!(path = %path.display(), session_id = %session.session_id, "loaded session");
                Ok(session)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let session = Self::generate();
                session.persist(path)?;
                tracing::info!(path = %path.display(), session_id = %session.session_id, "created session");
                Ok(session)
            }
            Err(e) => Err(AvatalkError::Session {
                message: format!("failed to read {}: {}", path.display(), e),
            }),
        }
    }

    /// Identity with known ids, e.g. supplied by the host application.
    pub fn new(session_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            user_id: user_id.into(),
        }
    }

    /// Fresh identity that is not written anywhere.
    pub fn generate() -> Self {
        Self {
            session_id: Uuid::new_v4().to_string(),
            user_id: Uuid::new_v4().to_string(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Default location: ~/.local/share/avatalk/session.json on Linux
    pub fn default_path() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("avatalk")
            .join("session.json")
    }

    fn persist(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}
