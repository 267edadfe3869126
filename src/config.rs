use serde::{Deserialize, Serialize};
use std::{
    fs::{read_to_string, write},
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{collation::Collator, error::FavTreeError};

pub const DEFAULT_HIERARCHY_PROPERTY: &str = "tags";
pub const DEFAULT_FILTER_ICON: &str = "🔎";
pub const DEFAULT_TAGGED_PAGE_LIMIT: usize = 30;
/// Time given to in-flight lazy loads before unreferenced expansion keys are collected.
pub const DEFAULT_GC_SETTLE_MS: u64 = 3000;

/// User-facing settings of the favorites tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Property deciding a tag's hierarchy. `tags` uses the page tag relation.
    pub hierarchy_property: String,
    pub filter_icon: String,
    /// Only show arrows on hover. Consumed by renderers.
    pub hover_arrow: bool,
    /// Maximum number of children displayed on each level.
    pub tagged_page_limit: usize,
    /// Locale used for sorting, e.g. `zh-CN`. Empty means the host's language.
    pub sorting_locale: String,
    pub gc_settle_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            hierarchy_property: DEFAULT_HIERARCHY_PROPERTY.to_string(),
            filter_icon: DEFAULT_FILTER_ICON.to_string(),
            hover_arrow: false,
            tagged_page_limit: DEFAULT_TAGGED_PAGE_LIMIT,
            sorting_locale: String::new(),
            gc_settle_ms: DEFAULT_GC_SETTLE_MS,
        }
    }
}

impl Settings {
    /// Sorting locale resolution: explicit setting, then the host's preferred language, then
    /// default ordering.
    pub fn collator(&self, host_language: Option<&str>) -> Collator {
        let configured = Some(self.sorting_locale.trim()).filter(|l| !l.is_empty());
        let host = host_language.map(str::trim).filter(|l| !l.is_empty());
        Collator::new(configured.or(host))
    }

    pub fn gc_settle(&self) -> Duration {
        Duration::from_millis(self.gc_settle_ms)
    }

    pub fn from_toml_str(content: &str) -> Result<Settings, FavTreeError> {
        let settings: Settings = toml::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), FavTreeError> {
        if self.hierarchy_property.trim().is_empty() {
            return Err(FavTreeError::Config(
                "hierarchy_property must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

pub trait SettingsProvider: Send + Sync {
    fn get_settings(&self) -> Result<Settings, FavTreeError>;
    fn set_settings(&self, settings: &Settings) -> Result<(), FavTreeError>;
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TomlSettingsProvider {
    path: PathBuf,
}

impl TomlSettingsProvider {
    pub fn new(path: PathBuf) -> Self {
        TomlSettingsProvider { path }
    }
}

impl SettingsProvider for TomlSettingsProvider {
    fn get_settings(&self) -> Result<Settings, FavTreeError> {
        tracing::debug!("Attempting to read settings from: {:?}", &self.path);
        if !self.path.exists() {
            tracing::debug!("Settings file not found, using defaults.");
            return Ok(Settings::default());
        }
        Settings::from_toml_str(&get_content(&self.path)?)
    }

    fn set_settings(&self, settings: &Settings) -> Result<(), FavTreeError> {
        tracing::debug!("Attempting to write settings to: {:?}", &self.path);
        settings.validate()?;
        let toml_string = toml::to_string(settings)?;
        write(&self.path, toml_string)?;
        Ok(())
    }
}

pub fn get_content<P: AsRef<Path>>(path: P) -> Result<String, FavTreeError> {
    tracing::debug!("Reading {:?}", path.as_ref());
    Ok(read_to_string(path)?)
}
