use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Path to the repository root this CLI operates against. Defaults to
    /// the current directory when unset.
    pub repo_path: Option<String>,
    /// Branch checked out by commands that don't name one explicitly.
    pub default_branch: Option<String>,
    /// Vector-store collections this CLI drives sync pipelines over.
    #[serde(default)]
    pub collections: Vec<String>,
    /// Path to the reference SQLite versioning database, relative to
    /// `repo_path` unless absolute. Defaults to `.vecsync/versioning.db`.
    pub versioning_db: Option<String>,
    /// Path to the reference local SQLite file backing the sync-state
    /// store (C2) and deletion tracker (C3). Defaults to
    /// `.vecsync/state.db`.
    pub state_db: Option<String>,
}

impl Config {
    pub fn config_path() -> anyhow::Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("dev", "vecsync", "vecsync")
            .ok_or_else(|| anyhow::anyhow!("could not determine config directory"))?;

        let config_dir = proj_dirs.config_dir();
        std::fs::create_dir_all(config_dir)?;

        Ok(config_dir.join("config.toml"))
    }

    pub fn load() -> anyhow::Result<Self> {
        let path = Self::config_path()?;

        if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            let config: Config = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let path = Self::config_path()?;
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    pub fn repo_path(&self) -> PathBuf {
        self.repo_path
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
    }

    pub fn default_branch(&self) -> &str {
        self.default_branch.as_deref().unwrap_or("main")
    }

    pub fn versioning_db_path(&self) -> PathBuf {
        let rel = self.versioning_db.as_deref().unwrap_or(".vecsync/versioning.db");
        self.resolve(rel)
    }

    pub fn state_db_path(&self) -> PathBuf {
        let rel = self.state_db.as_deref().unwrap_or(".vecsync/state.db");
        self.resolve(rel)
    }

    fn resolve(&self, rel: &str) -> PathBuf {
        let rel_path = PathBuf::from(rel);
        if rel_path.is_absolute() {
            rel_path
        } else {
            self.repo_path().join(rel_path)
        }
    }
}
