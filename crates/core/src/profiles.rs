use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub const DEFAULT_MYSQL_PORT: u16 = 3306;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PasswordSource {
    #[default]
    Inline,
    EnvVar,
    Keyring,
}

#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectionProfile {
    pub id: String,
    pub name: String,
    pub host: String,
    pub port: u16,
    pub user: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub password_source: PasswordSource,
    #[serde(default)]
    pub database: Option<String>,
    /// Databases shown when browsing; empty means "all of them".
    #[serde(default)]
    pub selected_databases: Vec<String>,
}

impl ConnectionProfile {
    /// Builds a profile with a freshly generated id.
    #[must_use]
    pub fn new(name: impl Into<String>, host: impl Into<String>, user: impl Into<String>) -> Self {
        Self::with_id(generate_profile_id(), name, host, user)
    }

    #[must_use]
    pub fn with_id(
        id: impl Into<String>,
        name: impl Into<String>,
        host: impl Into<String>,
        user: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            host: host.into(),
            port: DEFAULT_MYSQL_PORT,
            user: user.into(),
            password: None,
            password_source: PasswordSource::Inline,
            database: None,
            selected_databases: Vec::new(),
        }
    }

    #[must_use]
    pub fn endpoint(&self) -> String {
        format!("{}@{}:{}", self.user, self.host, self.port)
    }
}

impl fmt::Debug for ConnectionProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionProfile")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("password_source", &self.password_source)
            .field("database", &self.database)
            .field("selected_databases", &self.selected_databases)
            .finish()
    }
}

#[must_use]
pub fn generate_profile_id() -> String {
    Uuid::new_v4().to_string()
}

#[derive(Debug, Error)]
pub enum ProfilesError {
    #[error("config directory is unavailable for this platform")]
    ConfigDirUnavailable,
    #[error("failed to read profiles file at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse profiles file at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to create config directory at {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize profiles: {source}")]
    Serialize {
        #[source]
        source: toml::ser::Error,
    },
    #[error("failed to write profiles file at {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Persistence for connection profiles, keyed by profile id.
pub trait ProfileStore: Send {
    fn profiles(&self) -> &[ConnectionProfile];

    fn profile(&self, id: &str) -> Option<&ConnectionProfile> {
        self.profiles().iter().find(|profile| profile.id == id)
    }

    /// Replaces the profile with the same id, or appends it.
    fn upsert_profile(&mut self, profile: ConnectionProfile);

    /// Returns whether a profile was removed.
    fn delete_profile(&mut self, id: &str) -> bool;

    fn persist(&self) -> Result<(), ProfilesError>;
}

fn upsert_into(profiles: &mut Vec<ConnectionProfile>, profile: ConnectionProfile) {
    if let Some(existing) = profiles
        .iter_mut()
        .find(|existing| existing.id == profile.id)
    {
        *existing = profile;
    } else {
        profiles.push(profile);
    }
}

fn delete_from(profiles: &mut Vec<ConnectionProfile>, id: &str) -> bool {
    let original_len = profiles.len();
    profiles.retain(|profile| profile.id != id);
    profiles.len() != original_len
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SettingsDocument {
    #[serde(default)]
    nextsql: SettingsSection,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SettingsSection {
    #[serde(default)]
    connections: Vec<ConnectionProfile>,
}

impl SettingsDocument {
    /// Drops earlier duplicates of an id, keeping file order otherwise.
    fn into_profiles(self) -> Vec<ConnectionProfile> {
        let mut profiles = Vec::with_capacity(self.nextsql.connections.len());
        for profile in self.nextsql.connections {
            profiles.retain(|existing: &ConnectionProfile| existing.id != profile.id);
            profiles.push(profile);
        }
        profiles
    }
}

#[derive(Debug, Clone)]
pub struct FileProfilesStore {
    path: PathBuf,
    profiles: Vec<ConnectionProfile>,
}

impl FileProfilesStore {
    pub fn load_default() -> Result<Self, ProfilesError> {
        let path = default_profiles_path()?;
        Self::load_from_path(path)
    }

    pub fn load_from_path(path: impl Into<PathBuf>) -> Result<Self, ProfilesError> {
        let path = path.into();
        if !path.exists() {
            return Ok(Self {
                path,
                profiles: Vec::new(),
            });
        }

        let raw = fs::read_to_string(&path).map_err(|source| ProfilesError::Read {
            path: path.clone(),
            source,
        })?;

        if raw.trim().is_empty() {
            return Ok(Self {
                path,
                profiles: Vec::new(),
            });
        }

        let doc: SettingsDocument = toml::from_str(&raw).map_err(|source| ProfilesError::Parse {
            path: path.clone(),
            source,
        })?;

        Ok(Self {
            path,
            profiles: doc.into_profiles(),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ProfileStore for FileProfilesStore {
    fn profiles(&self) -> &[ConnectionProfile] {
        &self.profiles
    }

    fn upsert_profile(&mut self, profile: ConnectionProfile) {
        upsert_into(&mut self.profiles, profile);
    }

    fn delete_profile(&mut self, id: &str) -> bool {
        delete_from(&mut self.profiles, id)
    }

    fn persist(&self) -> Result<(), ProfilesError> {
        if let Some(parent_dir) = self.path.parent() {
            fs::create_dir_all(parent_dir).map_err(|source| ProfilesError::CreateDir {
                path: parent_dir.to_path_buf(),
                source,
            })?;
        }

        let doc = SettingsDocument {
            nextsql: SettingsSection {
                connections: self.profiles.clone(),
            },
        };
        let rendered =
            toml::to_string_pretty(&doc).map_err(|source| ProfilesError::Serialize { source })?;

        fs::write(&self.path, rendered).map_err(|source| ProfilesError::Write {
            path: self.path.clone(),
            source,
        })
    }
}

/// Non-persistent store, handy for temporary sessions and tests.
#[derive(Debug, Clone, Default)]
pub struct InMemoryProfileStore {
    profiles: Vec<ConnectionProfile>,
}

impl InMemoryProfileStore {
    #[must_use]
    pub fn new(profiles: Vec<ConnectionProfile>) -> Self {
        Self { profiles }
    }
}

impl ProfileStore for InMemoryProfileStore {
    fn profiles(&self) -> &[ConnectionProfile] {
        &self.profiles
    }

    fn upsert_profile(&mut self, profile: ConnectionProfile) {
        upsert_into(&mut self.profiles, profile);
    }

    fn delete_profile(&mut self, id: &str) -> bool {
        delete_from(&mut self.profiles, id)
    }

    fn persist(&self) -> Result<(), ProfilesError> {
        Ok(())
    }
}

pub fn default_profiles_path() -> Result<PathBuf, ProfilesError> {
    if let Some(custom) = env::var_os("NEXTSQL_CONFIG_DIR") {
        return Ok(PathBuf::from(custom).join("profiles.toml"));
    }

    let base_dir = if cfg!(target_os = "windows") {
        env::var_os("APPDATA")
            .map(PathBuf::from)
            .ok_or(ProfilesError::ConfigDirUnavailable)?
    } else if let Some(xdg_config_home) = env::var_os("XDG_CONFIG_HOME") {
        PathBuf::from(xdg_config_home)
    } else {
        let home = env::var_os("HOME").ok_or(ProfilesError::ConfigDirUnavailable)?;
        PathBuf::from(home).join(".config")
    };

    Ok(base_dir.join("nextsql").join("profiles.toml"))
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use tempfile::TempDir;

    use super::{ConnectionProfile, FileProfilesStore, PasswordSource, ProfileStore};

    fn temp_profiles_path(temp_dir: &TempDir) -> PathBuf {
        temp_dir.path().join("profiles.toml")
    }

    #[test]
    fn missing_profiles_file_loads_empty_store() {
        let temp_dir = TempDir::new().expect("failed to create temp directory");
        let path = temp_profiles_path(&temp_dir);

        let store = FileProfilesStore::load_from_path(path).expect("failed to load store");
        assert!(store.profiles().is_empty());
    }

    #[test]
    fn upsert_persist_reload_and_delete_profile() {
        let temp_dir = TempDir::new().expect("failed to create temp directory");
        let path = temp_profiles_path(&temp_dir);

        let mut store = FileProfilesStore::load_from_path(&path).expect("failed to load store");
        let mut profile = ConnectionProfile::with_id("p1", "local", "127.0.0.1", "root");
        profile.database = Some("shop".to_string());
        profile.password = Some("secret".to_string());
        profile.selected_databases = vec!["shop".to_string(), "audit".to_string()];

        store.upsert_profile(profile.clone());
        store.persist().expect("failed to persist store");

        let mut reloaded = FileProfilesStore::load_from_path(&path).expect("failed to reload");
        assert_eq!(reloaded.profile("p1"), Some(&profile));

        let mut updated = profile.clone();
        updated.selected_databases = vec!["shop".to_string()];
        reloaded.upsert_profile(updated);
        reloaded.persist().expect("failed to persist update");

        let mut reloaded = FileProfilesStore::load_from_path(&path).expect("failed to reload");
        assert_eq!(reloaded.profiles().len(), 1);
        assert_eq!(
            reloaded.profile("p1").map(|p| p.selected_databases.clone()),
            Some(vec!["shop".to_string()])
        );

        assert!(reloaded.delete_profile("p1"));
        assert!(!reloaded.delete_profile("p1"));
        reloaded.persist().expect("failed to persist deletion");

        let reloaded = FileProfilesStore::load_from_path(path).expect("failed final reload");
        assert!(reloaded.profiles().is_empty());
    }

    #[test]
    fn profiles_live_under_namespaced_key_and_default_missing_fields() {
        let temp_dir = TempDir::new().expect("failed to create temp directory");
        let path = temp_profiles_path(&temp_dir);
        fs::write(
            &path,
            r#"
[[nextsql.connections]]
id = "a"
name = "first"
host = "db.internal"
port = 3307
user = "app"

[[nextsql.connections]]
id = "a"
name = "first, edited"
host = "db.internal"
port = 3307
user = "app"
password_source = "keyring"
"#,
        )
        .expect("failed to seed profiles file");

        let store = FileProfilesStore::load_from_path(&path).expect("failed to load store");
        assert_eq!(store.profiles().len(), 1);
        let profile = store.profile("a").expect("profile should load");
        assert_eq!(profile.name, "first, edited");
        assert_eq!(profile.password_source, PasswordSource::Keyring);
        assert!(profile.selected_databases.is_empty());
        assert!(profile.password.is_none());
    }

    #[test]
    fn debug_output_redacts_password() {
        let mut profile = ConnectionProfile::with_id("p1", "local", "127.0.0.1", "root");
        profile.password = Some("hunter2".to_string());

        let rendered = format!("{profile:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn generated_ids_are_unique() {
        let first = ConnectionProfile::new("a", "localhost", "root");
        let second = ConnectionProfile::new("a", "localhost", "root");
        assert_ne!(first.id, second.id);
        assert_eq!(first.port, 3306);
    }
}
