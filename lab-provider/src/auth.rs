//! Credential resolution.
//!
//! `DATABRICKS_HOST` and `DATABRICKS_TOKEN` win when both are set and no
//! profile was requested. Otherwise the named profile (or `DEFAULT`) is read
//! from `~/.databrickscfg`, or from `DATABRICKS_CONFIG_FILE` when set.

use std::fmt;
use std::path::{Path, PathBuf};

use ini::Ini;
use tracing::debug;
use url::Url;

use crate::error::{ClientError, ClientResult};

pub const DEFAULT_PROFILE: &str = "DEFAULT";

#[derive(Clone)]
pub struct Credentials {
    pub host: Url,
    pub token: String,
    /// Where the credentials came from, for diagnostics.
    pub source: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("host", &self.host.as_str())
            .field("token", &"<redacted>")
            .field("source", &self.source)
            .finish()
    }
}

impl Credentials {
    pub fn new(host: &str, token: impl Into<String>, source: impl Into<String>) -> ClientResult<Self> {
        Ok(Self {
            host: parse_host(host)?,
            token: token.into(),
            source: source.into(),
        })
    }

    pub fn resolve(profile: Option<&str>) -> ClientResult<Self> {
        if profile.is_none() {
            if let (Ok(host), Ok(token)) = (
                std::env::var("DATABRICKS_HOST"),
                std::env::var("DATABRICKS_TOKEN"),
            ) {
                if !host.is_empty() && !token.is_empty() {
                    debug!("using credentials from environment");
                    return Self::new(&host, token, "environment");
                }
            }
        }

        let path = config_file_path()?;
        Self::from_config_file(&path, profile.unwrap_or(DEFAULT_PROFILE))
    }

    pub fn from_config_file(path: &Path, profile: &str) -> ClientResult<Self> {
        let ini = Ini::load_from_file(path).map_err(|e| {
            ClientError::Auth(format!("Cannot read {}: {e}", path.display()))
        })?;
        Self::from_ini(&ini, profile, &path.display().to_string())
    }

    pub fn from_ini(ini: &Ini, profile: &str, origin: &str) -> ClientResult<Self> {
        let section = ini.section(Some(profile)).ok_or_else(|| {
            ClientError::Auth(format!("Profile '{profile}' not found in {origin}"))
        })?;

        let host = section
            .get("host")
            .ok_or_else(|| ClientError::Auth(format!("Profile '{profile}' has no host")))?;
        let token = section
            .get("token")
            .ok_or_else(|| ClientError::Auth(format!("Profile '{profile}' has no token")))?;

        debug!(profile, origin, "using credentials from config profile");
        Self::new(host, token, format!("{origin} [{profile}]"))
    }
}

fn config_file_path() -> ClientResult<PathBuf> {
    if let Ok(path) = std::env::var("DATABRICKS_CONFIG_FILE") {
        return Ok(PathBuf::from(path));
    }
    dirs::home_dir()
        .map(|home| home.join(".databrickscfg"))
        .ok_or_else(|| ClientError::Auth("Cannot determine home directory".to_string()))
}

fn parse_host(host: &str) -> ClientResult<Url> {
    let host = host.trim().trim_end_matches('/');
    let with_scheme = if host.contains("://") {
        host.to_string()
    } else {
        format!("https://{host}")
    };
    Url::parse(&with_scheme)
        .map_err(|e| ClientError::Auth(format!("Invalid workspace host '{host}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    const CFG: &str = "\
[DEFAULT]
host = https://dbc-1234.cloud.databricks.com/
token = dapi-default

[workshop]
host = adb-42.azuredatabricks.net
token = dapi-workshop

[broken]
host = https://example.com
";

    #[test]
    fn reads_named_profile() {
        let ini = Ini::load_from_str(CFG).unwrap();
        let creds = Credentials::from_ini(&ini, "workshop", "test").unwrap();
        assert_eq!(creds.host.as_str(), "https://adb-42.azuredatabricks.net/");
        assert_eq!(creds.token, "dapi-workshop");
    }

    #[test]
    fn default_profile_trailing_slash() {
        let ini = Ini::load_from_str(CFG).unwrap();
        let creds = Credentials::from_ini(&ini, DEFAULT_PROFILE, "test").unwrap();
        assert_eq!(creds.host.host_str(), Some("dbc-1234.cloud.databricks.com"));
    }

    #[test]
    fn missing_profile_or_token_is_auth_error() {
        let ini = Ini::load_from_str(CFG).unwrap();
        assert!(matches!(
            Credentials::from_ini(&ini, "nope", "test"),
            Err(ClientError::Auth(_))
        ));
        assert!(matches!(
            Credentials::from_ini(&ini, "broken", "test"),
            Err(ClientError::Auth(_))
        ));
    }

    #[test]
    fn debug_redacts_token() {
        let creds = Credentials::new("example.com", "secret-token", "test").unwrap();
        assert!(!format!("{creds:?}").contains("secret-token"));
    }
}
