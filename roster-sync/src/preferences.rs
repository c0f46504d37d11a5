//! User preferences, privacy flags and local persistence.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;

/// Synced user preferences.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Preferences {
    pub use_server_notes: bool,
    pub share_friends_across_alts: bool,
    pub show_job_column: bool,
    pub show_zone_column: bool,
    pub show_nation_column: bool,
    pub show_last_seen_column: bool,
    pub notify_on_online: bool,
    pub notify_on_request: bool,
    /// Local only; switches the log filter.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub debug_mode: bool,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            use_server_notes: false,
            share_friends_across_alts: true,
            show_job_column: true,
            show_zone_column: true,
            show_nation_column: true,
            show_last_seen_column: true,
            notify_on_online: true,
            notify_on_request: true,
            debug_mode: false,
        }
    }
}

/// Privacy flags of the local character, written to the remote service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StatusFlags {
    pub show_online_status: bool,
    pub share_location: bool,
    pub is_anonymous: bool,
    pub share_job_when_anonymous: bool,
}

impl Default for StatusFlags {
    fn default() -> Self {
        Self {
            show_online_status: true,
            share_location: true,
            is_anonymous: false,
            share_job_when_anonymous: false,
        }
    }
}

/// Local persistence of preferences.
#[async_trait]
pub trait PreferencesStore: Send + Sync + 'static {
    async fn load(&self) -> Result<Option<Preferences>>;

    async fn save(&self, preferences: &Preferences) -> Result<()>;
}

/// Stores preferences as pretty-printed JSON in a single file.
#[derive(Debug, Clone)]
pub struct JsonFilePreferencesStore {
    path: PathBuf,
}

impl JsonFilePreferencesStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl PreferencesStore for JsonFilePreferencesStore {
    async fn load(&self) -> Result<Option<Preferences>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, preferences: &Preferences) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_vec_pretty(preferences)?;

        // Write then rename so a crash never leaves a truncated file.
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;

        debug!(path = %self.path.display(), "Preferences saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preferences_wire_names() {
        let json = serde_json::to_value(Preferences::default()).unwrap();
        assert_eq!(json["showJobColumn"], true);
        assert_eq!(json["shareFriendsAcrossAlts"], true);
        assert!(json.get("debugMode").is_none());

        let flags: StatusFlags = serde_json::from_str(r#"{"isAnonymous":true}"#).unwrap();
        assert!(flags.is_anonymous);
        assert!(flags.show_online_status);
    }

    #[tokio::test]
    async fn test_json_file_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFilePreferencesStore::new(dir.path().join("nested").join("prefs.json"));

        assert_eq!(store.load().await.unwrap(), None);

        let prefs = Preferences {
            show_zone_column: false,
            debug_mode: true,
            ..Preferences::default()
        };
        store.save(&prefs).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(prefs));
    }

    #[tokio::test]
    async fn test_json_file_store_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prefs.json");
        tokio::fs::write(&path, b"not json").await.unwrap();

        let store = JsonFilePreferencesStore::new(&path);
        assert!(store.load().await.is_err());
    }
}
