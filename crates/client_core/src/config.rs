use std::{
    fs, io,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Context;
use serde::Deserialize;
use shared::protocol::{
    projects_by_year_route, version_route, working_directory_route, years_route,
};
use tracing::warn;
use url::Url;

pub const DEFAULT_SETTINGS_FILE: &str = "catalog.toml";

/// Paths of the catalog API, relative to the server url. The by-year route
/// carries a `{year}` segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Routes {
    pub projects_by_year: String,
    pub working_directory: String,
    pub years: String,
    pub version: String,
}

impl Default for Routes {
    fn default() -> Self {
        Self {
            projects_by_year: projects_by_year_route().into(),
            working_directory: working_directory_route().into(),
            years: years_route().into(),
            version: version_route().into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    pub server_url: String,
    pub routes: Routes,
    pub request_timeout_secs: Option<u64>,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:8000".into(),
            routes: Routes::default(),
            request_timeout_secs: None,
        }
    }
}

impl ClientSettings {
    pub fn base_url(&self) -> anyhow::Result<Url> {
        let url = Url::parse(self.server_url.trim())
            .with_context(|| format!("invalid server url '{}'", self.server_url))?;
        if url.cannot_be_a_base() {
            anyhow::bail!("server url '{}' cannot carry a path", self.server_url);
        }
        Ok(url)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    server_url: Option<String>,
    projects_by_year_route: Option<String>,
    working_directory_route: Option<String>,
    years_route: Option<String>,
    version_route: Option<String>,
    request_timeout_secs: Option<u64>,
}

/// Defaults, then `catalog.toml` (or `path`), then the process environment.
pub fn load_settings(path: Option<&Path>) -> ClientSettings {
    let path = path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SETTINGS_FILE));
    load_settings_with_env(&path, |key| std::env::var(key).ok())
}

pub fn load_settings_with_env(
    path: &Path,
    env: impl Fn(&str) -> Option<String>,
) -> ClientSettings {
    let mut settings = ClientSettings::default();

    match read_file_settings(path) {
        Ok(Some(file_cfg)) => apply_file_settings(&mut settings, file_cfg),
        Ok(None) => {}
        Err(err) => warn!(path = %path.display(), "config: ignoring settings file: {err:#}"),
    }

    if let Some(v) = env("CATALOG_SERVER_URL") {
        settings.server_url = v;
    }
    if let Some(v) = env("APP__SERVER_URL") {
        settings.server_url = v;
    }

    if let Some(v) = env("CATALOG_REQUEST_TIMEOUT_SECS") {
        if let Ok(parsed) = v.trim().parse::<u64>() {
            settings.request_timeout_secs = Some(parsed);
        }
    }

    settings
}

fn read_file_settings(path: &Path) -> anyhow::Result<Option<FileSettings>> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(err).with_context(|| format!("failed to read '{}'", path.display()))
        }
    };
    let parsed = toml::from_str::<FileSettings>(&raw)
        .with_context(|| format!("failed to parse '{}'", path.display()))?;
    Ok(Some(parsed))
}

fn apply_file_settings(settings: &mut ClientSettings, file_cfg: FileSettings) {
    if let Some(v) = file_cfg.server_url {
        settings.server_url = v;
    }
    if let Some(v) = file_cfg.projects_by_year_route {
        settings.routes.projects_by_year = v;
    }
    if let Some(v) = file_cfg.working_directory_route {
        settings.routes.working_directory = v;
    }
    if let Some(v) = file_cfg.years_route {
        settings.routes.years = v;
    }
    if let Some(v) = file_cfg.version_route {
        settings.routes.version = v;
    }
    if let Some(v) = file_cfg.request_timeout_secs {
        settings.request_timeout_secs = Some(v);
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
