//! Layered configuration for the `annforest` command line host.
//!
//! Sources are merged in order, later ones winning:
//! - Built-in defaults
//! - `.annforest/settings.toml` (searched from the current directory upwards)
//! - Environment variables
//!
//! # Environment Variables
//!
//! Variables are prefixed with `ANNFOREST_` and use double underscores to
//! separate nested levels:
//! - `ANNFOREST_INDEX__N_TREES=50` sets `index.n_trees`
//! - `ANNFOREST_SEARCH__SEARCH_K=2000` sets `search.search_k`
//! - `ANNFOREST_VERBOSE=true` sets `verbose`
//!
//! The library API never reads settings; the CLI turns them into
//! [`IndexOptions`] with [`Settings::index_options`].

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::vector::{DEFAULT_SEED, IndexOptions, MetricKind};

/// Directory holding the settings file.
pub const CONFIG_DIR: &str = ".annforest";

/// Settings file name inside [`CONFIG_DIR`].
pub const CONFIG_FILE: &str = "settings.toml";

/// Settings schema version this build reads and writes.
pub const CONFIG_VERSION: u32 = 1;

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Settings {
    /// Version of the configuration schema
    #[serde(default = "default_version")]
    pub version: u32,

    /// Emit build, load and save diagnostics
    #[serde(default)]
    pub verbose: bool,

    #[serde(default)]
    pub index: IndexConfig,

    #[serde(default)]
    pub search: SearchConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct IndexConfig {
    /// Distance metric for new indices
    #[serde(default)]
    pub metric: MetricKind,

    /// Trees per build; 0 derives a count from the number of items
    #[serde(default)]
    pub n_trees: usize,

    /// Seed for split selection
    #[serde(default = "default_seed")]
    pub seed: u64,

    /// Threads used to build trees
    #[serde(default = "default_build_threads")]
    pub build_threads: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Default)]
pub struct SearchConfig {
    /// Candidate budget per query; unset means `k * n_trees`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_k: Option<usize>,

    /// Report distances alongside item ids
    #[serde(default)]
    pub include_distances: bool,
}

fn default_version() -> u32 {
    CONFIG_VERSION
}
fn default_seed() -> u64 {
    DEFAULT_SEED
}
fn default_build_threads() -> usize {
    num_cpus::get()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            verbose: false,
            index: IndexConfig::default(),
            search: SearchConfig::default(),
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            metric: MetricKind::default(),
            n_trees: 0,
            seed: default_seed(),
            build_threads: default_build_threads(),
        }
    }
}

impl Settings {
    /// Load configuration from all sources
    pub fn load() -> Result<Self, Box<figment::Error>> {
        let config_path = Self::find_config().unwrap_or_else(Self::default_path);
        Self::figment(config_path)
            .extract::<Self>()
            .map_err(Box::new)?
            .check_version()
    }

    /// Load configuration from a specific file, still honoring environment
    /// overrides
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, Box<figment::Error>> {
        Self::figment(path.as_ref().to_path_buf())
            .extract::<Self>()
            .map_err(Box::new)?
            .check_version()
    }

    fn check_version(self) -> Result<Self, Box<figment::Error>> {
        if self.version == CONFIG_VERSION {
            Ok(self)
        } else {
            Err(Box::new(figment::Error::from(format!(
                "unsupported settings version {} (expected {CONFIG_VERSION})",
                self.version
            ))))
        }
    }

    fn figment(config_path: PathBuf) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Settings::default()))
            .merge(Toml::file(config_path))
            // Double underscore separates nesting levels, single underscores
            // stay inside field names
            .merge(Env::prefixed("ANNFOREST_").map(|key| {
                key.as_str().to_lowercase().replace("__", ".").into()
            }))
    }

    fn default_path() -> PathBuf {
        Path::new(CONFIG_DIR).join(CONFIG_FILE)
    }

    /// Searches from the current directory up to the filesystem root
    fn find_config() -> Option<PathBuf> {
        let current = std::env::current_dir().ok()?;
        current
            .ancestors()
            .map(|ancestor| ancestor.join(CONFIG_DIR))
            .find(|dir| dir.is_dir())
            .map(|dir| dir.join(CONFIG_FILE))
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), Box<dyn std::error::Error>> {
        let parent = path.as_ref().parent().ok_or("Invalid path")?;
        std::fs::create_dir_all(parent)?;

        let toml_string = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_string)?;

        Ok(())
    }

    /// Options for a new index built with these settings.
    #[must_use]
    pub fn index_options(&self) -> IndexOptions {
        IndexOptions {
            metric: self.index.metric,
            seed: self.index.seed,
            build_threads: self.index.build_threads,
            verbose: self.verbose,
        }
    }

    /// Writes the commented settings template to `.annforest/settings.toml`.
    pub fn init_config_file(force: bool) -> Result<PathBuf, Box<dyn std::error::Error>> {
        let config_path = Self::default_path();
        Self::write_template(&config_path, force)?;
        Ok(config_path)
    }

    /// Writes the settings template to `path`.
    pub fn write_template(path: &Path, force: bool) -> Result<(), Box<dyn std::error::Error>> {
        if !force && path.exists() {
            return Err("Configuration file already exists. Use --force to overwrite".into());
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let template = format!(
            r#"# annforest configuration

# Version of the configuration schema
version = {CONFIG_VERSION}

# Log build, load and save progress
verbose = false

[index]
# Distance metric for new indices: "angular" or "euclidean"
metric = "angular"

# Trees per build. More trees raise recall and index size.
# 0 picks a count from the number of items.
n_trees = 0

# Seed for split selection. Equal seeds build identical forests.
seed = {DEFAULT_SEED}

# Threads used to build trees (defaults to CPU count)
# build_threads = {threads}

[search]
# Candidates examined per query. Unset means k * n_trees.
# search_k = 1000

# Print distances next to item ids
include_distances = false
"#,
            threads = num_cpus::get()
        );

        std::fs::write(path, template)?;
        Ok(())
    }
}
