//! Client configuration, resolved from a dotenv-style file, the process
//! environment and explicit builder values.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use url::Url;

use crate::error::{NyxError, Result};

pub const DEFAULT_NYX_URL: &str = "https://nyx-community-1.dev.iotics.space";
pub const DEFAULT_ENV_FILE: &str = ".env";

pub const NYX_URL: &str = "NYX_URL";
pub const NYX_USERNAME: &str = "NYX_USERNAME";
pub const NYX_EMAIL: &str = "NYX_EMAIL";
pub const NYX_PASSWORD: &str = "NYX_PASSWORD";
pub const NYX_TOKEN: &str = "NYX_TOKEN";
pub const HOST_VERIFY_SSL: &str = "HOST_VERIFY_SSL";
pub const NYX_TIMEOUT_SECS: &str = "NYX_TIMEOUT_SECS";

const KEYS: [&str; 7] = [
    NYX_URL,
    NYX_USERNAME,
    NYX_EMAIL,
    NYX_PASSWORD,
    NYX_TOKEN,
    HOST_VERIFY_SSL,
    NYX_TIMEOUT_SECS,
];

/// Connection parameters for a Nyx instance.
///
/// Fixed once built; a [`crate::NyxClient`] never mutates it. The `Debug`
/// implementation masks the password and token.
#[derive(Clone)]
pub struct NyxConfig {
    /// Root URL of the Nyx instance, without the API prefix
    pub url: Url,
    pub username: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    /// Pre-issued access token; when set, login is skipped
    pub override_token: Option<String>,
    /// Whether to verify TLS certificates (default: true)
    pub verify_ssl: bool,
    /// Per-request timeout (default: 30 seconds)
    pub timeout: Duration,
}

impl fmt::Debug for NyxConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NyxConfig")
            .field("url", &self.url.as_str())
            .field("username", &self.username)
            .field("email", &self.email)
            .field("password", &self.password.as_ref().map(|_| "***REDACTED***"))
            .field(
                "override_token",
                &self.override_token.as_ref().map(|_| "***REDACTED***"),
            )
            .field("verify_ssl", &self.verify_ssl)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl NyxConfig {
    /// Minimum allowed timeout value.
    pub const MIN_TIMEOUT: Duration = Duration::from_millis(100);

    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

    pub fn builder() -> NyxConfigBuilder {
        NyxConfigBuilder::new()
    }

    /// Loads `.env` from `working_dir`, overlaid with the process environment.
    pub fn load(working_dir: impl Into<PathBuf>) -> Result<Self> {
        NyxConfigBuilder::new().working_dir(working_dir).build()
    }

    /// Loads the given env file, overlaid with the process environment.
    pub fn from_env_file(path: impl Into<PathBuf>) -> Result<Self> {
        NyxConfigBuilder::new().env_file(path).build()
    }

    pub fn validate(&self) -> Result<()> {
        if self.override_token.is_none() {
            let missing: Vec<&str> = [
                (NYX_EMAIL, &self.email),
                (NYX_PASSWORD, &self.password),
            ]
            .into_iter()
            .filter(|(_, v)| v.as_deref().map_or(true, str::is_empty))
            .map(|(k, _)| k)
            .collect();
            if !missing.is_empty() {
                return Err(NyxError::Config(format!(
                    "missing required settings {missing:?} (or set {NYX_TOKEN})"
                )));
            }
        }

        if self.timeout < Self::MIN_TIMEOUT {
            return Err(NyxError::Config(format!(
                "timeout ({:?}) must be >= {:?}",
                self.timeout,
                Self::MIN_TIMEOUT
            )));
        }

        Ok(())
    }

    /// Renders the credentials in dotenv syntax.
    pub fn to_env_string(&self) -> String {
        let mut out = String::new();
        let mut line = |key: &str, value: &str| {
            out.push_str(&format!("{key}=\"{}\"\n", escape_env_value(value)));
        };
        line(NYX_URL, self.url.as_str().trim_end_matches('/'));
        if let Some(username) = &self.username {
            line(NYX_USERNAME, username);
        }
        if let Some(email) = &self.email {
            line(NYX_EMAIL, email);
        }
        if let Some(password) = &self.password {
            line(NYX_PASSWORD, password);
        }
        if !self.verify_ssl {
            line(HOST_VERIFY_SSL, "false");
        }
        out
    }

    /// Persists the credentials to `path`, replacing any existing file.
    pub fn write_env_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_env_string())?;
        Ok(())
    }
}

/// Escapes a value for a double-quoted dotenv entry, where `$` would
/// otherwise start a variable substitution.
fn escape_env_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' | '"' | '$' => {
                out.push('\\');
                out.push(c);
            }
            '\n' => out.push_str("\\n"),
            c => out.push(c),
        }
    }
    out
}

/// Builder for [`NyxConfig`].
///
/// Sources, lowest precedence first: defaults, the env file, the process
/// environment, explicit values.
#[derive(Debug)]
pub struct NyxConfigBuilder {
    working_dir: Option<PathBuf>,
    env_file: Option<PathBuf>,
    default_env_file: bool,
    process_env: bool,
    explicit: HashMap<&'static str, String>,
    timeout: Option<Duration>,
}

impl Default for NyxConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl NyxConfigBuilder {
    pub fn new() -> Self {
        Self {
            working_dir: None,
            env_file: None,
            default_env_file: true,
            process_env: true,
            explicit: HashMap::new(),
            timeout: None,
        }
    }

    /// Directory the default `.env` and relative env file paths resolve
    /// against. Defaults to the process working directory.
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Env file to read. Unlike the default `.env`, it must exist.
    pub fn env_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.env_file = Some(path.into());
        self
    }

    /// Whether to read `.env` from the working directory when no env file
    /// is given.
    pub fn default_env_file(mut self, enabled: bool) -> Self {
        self.default_env_file = enabled;
        self
    }

    /// Whether process environment variables override the env file.
    pub fn process_env(mut self, enabled: bool) -> Self {
        self.process_env = enabled;
        self
    }

    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.explicit.insert(NYX_URL, url.into());
        self
    }

    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.explicit.insert(NYX_USERNAME, username.into());
        self
    }

    pub fn email(mut self, email: impl Into<String>) -> Self {
        self.explicit.insert(NYX_EMAIL, email.into());
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.explicit.insert(NYX_PASSWORD, password.into());
        self
    }

    pub fn override_token(mut self, token: impl Into<String>) -> Self {
        self.explicit.insert(NYX_TOKEN, token.into());
        self
    }

    pub fn verify_ssl(mut self, verify: bool) -> Self {
        self.explicit.insert(HOST_VERIFY_SSL, verify.to_string());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Resolves all sources and validates the result.
    pub fn build(self) -> Result<NyxConfig> {
        let working_dir = match self.working_dir {
            Some(dir) => dir,
            None => std::env::current_dir()?,
        };

        let mut values = HashMap::new();
        match &self.env_file {
            Some(file) => {
                let path = working_dir.join(file);
                if !path.is_file() {
                    return Err(NyxError::Config(format!(
                        "env file {} does not exist",
                        path.display()
                    )));
                }
                values.extend(read_env_file(&path)?);
            }
            None if self.default_env_file => {
                let path = working_dir.join(DEFAULT_ENV_FILE);
                if path.is_file() {
                    values.extend(read_env_file(&path)?);
                } else {
                    tracing::debug!(path = %path.display(), "no env file found");
                }
            }
            None => {}
        }

        if self.process_env {
            for key in KEYS {
                if let Ok(value) = std::env::var(key) {
                    values.insert(key.to_string(), value);
                }
            }
        }

        for (key, value) in self.explicit {
            values.insert(key.to_string(), value);
        }

        let non_empty = |key: &str| values.get(key).filter(|v| !v.is_empty()).cloned();

        let raw_url = non_empty(NYX_URL).unwrap_or_else(|| DEFAULT_NYX_URL.to_string());
        let url = Url::parse(&raw_url)
            .map_err(|e| NyxError::Config(format!("invalid {NYX_URL} '{raw_url}': {e}")))?;
        if url.cannot_be_a_base() {
            return Err(NyxError::Config(format!(
                "invalid {NYX_URL} '{raw_url}': not a base URL"
            )));
        }

        let verify_ssl = non_empty(HOST_VERIFY_SSL)
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(true);

        let timeout = match (self.timeout, non_empty(NYX_TIMEOUT_SECS)) {
            (Some(timeout), _) => timeout,
            (None, Some(secs)) => secs.parse().map(Duration::from_secs).map_err(|_| {
                NyxError::Config(format!("invalid {NYX_TIMEOUT_SECS} '{secs}'"))
            })?,
            (None, None) => NyxConfig::DEFAULT_TIMEOUT,
        };

        let config = NyxConfig {
            url,
            username: non_empty(NYX_USERNAME),
            email: non_empty(NYX_EMAIL),
            password: non_empty(NYX_PASSWORD),
            override_token: non_empty(NYX_TOKEN),
            verify_ssl,
            timeout,
        };
        config.validate()?;
        Ok(config)
    }
}

fn read_env_file(path: &Path) -> Result<HashMap<String, String>> {
    dotenv::from_path_iter(path)
        .map_err(|e| NyxError::Config(format!("failed to read {}: {e}", path.display())))?
        .map(|item| {
            item.map_err(|e| NyxError::Config(format!("failed to parse {}: {e}", path.display())))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempdir::TempDir;

    fn isolated() -> NyxConfigBuilder {
        NyxConfig::builder().process_env(false)
    }

    #[test]
    fn test_explicit_values() {
        let dir = TempDir::new("nyx-config").unwrap();
        let config = isolated()
            .working_dir(dir.path())
            .url("https://nyx.example.com")
            .email("me@example.com")
            .password("secret")
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap();

        assert_eq!(config.url.as_str(), "https://nyx.example.com/");
        assert_eq!(config.email.as_deref(), Some("me@example.com"));
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert!(config.verify_ssl);
        assert!(config.override_token.is_none());
    }

    #[test]
    fn test_default_env_file_in_working_dir() {
        let dir = TempDir::new("nyx-config").unwrap();
        std::fs::write(
            dir.path().join(".env"),
            "NYX_URL=\"https://file.example.com\"\nNYX_EMAIL=\"file@example.com\"\nNYX_PASSWORD=\"pw\"\nHOST_VERIFY_SSL=False\n",
        )
        .unwrap();

        let config = isolated().working_dir(dir.path()).build().unwrap();
        assert_eq!(config.url.as_str(), "https://file.example.com/");
        assert_eq!(config.email.as_deref(), Some("file@example.com"));
        assert!(!config.verify_ssl);
    }

    #[test]
    fn test_explicit_overrides_file() {
        let dir = TempDir::new("nyx-config").unwrap();
        std::fs::write(
            dir.path().join(".env"),
            "NYX_EMAIL=file@example.com\nNYX_PASSWORD=pw\n",
        )
        .unwrap();

        let config = isolated()
            .working_dir(dir.path())
            .email("explicit@example.com")
            .build()
            .unwrap();
        assert_eq!(config.email.as_deref(), Some("explicit@example.com"));
        assert_eq!(config.password.as_deref(), Some("pw"));
        assert_eq!(config.url.as_str(), "https://nyx-community-1.dev.iotics.space/");
    }

    #[test]
    fn test_relative_env_file_resolves_against_working_dir() {
        let dir = TempDir::new("nyx-config").unwrap();
        std::fs::write(
            dir.path().join("nyx.env"),
            "NYX_TOKEN=abc\nNYX_TIMEOUT_SECS=12\n",
        )
        .unwrap();

        let config = isolated()
            .working_dir(dir.path())
            .env_file("nyx.env")
            .build()
            .unwrap();
        assert_eq!(config.override_token.as_deref(), Some("abc"));
        assert_eq!(config.timeout, Duration::from_secs(12));
    }

    #[test]
    fn test_missing_named_env_file() {
        let dir = TempDir::new("nyx-config").unwrap();
        let err = isolated()
            .working_dir(dir.path())
            .env_file("absent.env")
            .build()
            .unwrap_err();
        assert!(matches!(err, NyxError::Config(_)));
        assert!(err.to_string().contains("absent.env"));
    }

    #[test]
    fn test_missing_credentials() {
        let dir = TempDir::new("nyx-config").unwrap();
        let err = isolated()
            .working_dir(dir.path())
            .email("me@example.com")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains(NYX_PASSWORD));
        assert!(!err.to_string().contains(NYX_EMAIL));
    }

    #[test]
    fn test_token_replaces_credentials() {
        let dir = TempDir::new("nyx-config").unwrap();
        assert!(isolated()
            .working_dir(dir.path())
            .override_token("token")
            .build()
            .is_ok());
    }

    #[test]
    fn test_invalid_url() {
        let dir = TempDir::new("nyx-config").unwrap();
        let result = isolated()
            .working_dir(dir.path())
            .url("not a url")
            .override_token("token")
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_timeout_too_small() {
        let dir = TempDir::new("nyx-config").unwrap();
        let err = isolated()
            .working_dir(dir.path())
            .override_token("token")
            .timeout(Duration::from_millis(10))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("timeout"));
    }

    #[test]
    fn test_secrets_masked_in_debug() {
        let dir = TempDir::new("nyx-config").unwrap();
        let config = isolated()
            .working_dir(dir.path())
            .email("me@example.com")
            .password("super_secret_password")
            .override_token("super_secret_token")
            .build()
            .unwrap();

        let debug_output = format!("{:?}", config);
        assert!(!debug_output.contains("super_secret"));
        assert!(debug_output.contains("REDACTED"));
        assert!(debug_output.contains("me@example.com"));
    }

    #[test]
    fn test_env_file_written_then_loaded() {
        let dir = TempDir::new("nyx-config").unwrap();
        let written = isolated()
            .working_dir(dir.path())
            .url("https://nyx.example.com/")
            .email("me@example.com")
            .password("p4ss word#1")
            .build()
            .unwrap();
        let path = dir.path().join("nested").join(".env");
        written.write_env_file(&path).unwrap();

        let loaded = isolated()
            .working_dir(dir.path())
            .env_file("nested/.env")
            .build()
            .unwrap();
        assert_eq!(loaded.url, written.url);
        assert_eq!(loaded.email, written.email);
        assert_eq!(loaded.password.as_deref(), Some("p4ss word#1"));
    }

    #[test]
    fn test_env_file_round_trips_special_characters() {
        let dir = TempDir::new("nyx-config").unwrap();
        let password = r#"pa$word1 "q" \x ${HOME}"#;
        let written = isolated()
            .working_dir(dir.path())
            .email("me@example.com")
            .password(password)
            .build()
            .unwrap();
        written.write_env_file(dir.path().join(".env")).unwrap();

        let loaded = isolated().working_dir(dir.path()).build().unwrap();
        assert_eq!(loaded.password.as_deref(), Some(password));
    }
}
