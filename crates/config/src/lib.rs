//! Configuration for the chapter cache.
//!
//! Values are layered, later layers winning:
//!
//! 1. Built-in defaults (platform cache/data directories).
//! 2. A configuration file (TOML, YAML or JSON, chosen by extension).
//! 3. Environment variables prefixed with `TANKOBON_`, with `__` separating
//!    sections, e.g. `TANKOBON_DOWNLOADS__MAX_ATTEMPTS=5`.

pub mod error;
mod models;

pub use crate::models::{Config, DownloadConfig, NetworkPolicy, StorageConfig};

use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use std::path::{Path, PathBuf};
use tracing::debug;

const ENV_PREFIX: &str = "TANKOBON_";

pub(crate) fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", "tankobon")
}

/// Default location of the configuration file, if the platform has one.
pub fn default_config_path() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Load and validate configuration.
///
/// An explicitly given file must exist. Without one, the file at
/// [`default_config_path`] is used if present.
pub fn load(path: Option<&Path>) -> Result<Config> {
    let figment = Figment::from(Serialized::defaults(Config::default()));
    let figment = match path {
        Some(path) => merge_file(figment, path, true)?,
        None => match default_config_path() {
            Some(path) => merge_file(figment, &path, false)?,
            None => figment,
        },
    };
    let config: Config = figment
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
        .extract()
        .or_raise(|| ErrorKind::Load)?;
    config.validate()?;
    Ok(config)
}

fn merge_file(figment: Figment, path: &Path, required: bool) -> Result<Figment> {
    debug!(path = %path.display(), required, "loading configuration file");
    let extension = path.extension().and_then(|ext| ext.to_str()).unwrap_or("toml").to_ascii_lowercase();
    if !matches!(extension.as_str(), "toml" | "yaml" | "yml" | "json") {
        exn::bail!(ErrorKind::UnsupportedFormat(extension));
    }
    if !path.is_file() {
        if required {
            exn::bail!(ErrorKind::Load);
        }
        return Ok(figment);
    }
    Ok(match extension.as_str() {
        "yaml" | "yml" => figment.merge(Yaml::file_exact(path)),
        "json" => figment.merge(Json::file_exact(path)),
        _ => figment.merge(Toml::file_exact(path)),
    })
}
