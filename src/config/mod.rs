use std::collections::HashMap;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Which CLI transport the adapters talk through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterMode {
    Simulated,
    Ssh,
}

impl FromStr for AdapterMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "simulated" | "mock" => Ok(AdapterMode::Simulated),
            "ssh" | "live" => Ok(AdapterMode::Ssh),
            other => Err(format!("unknown adapter mode: {}", other)),
        }
    }
}

impl std::fmt::Display for AdapterMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AdapterMode::Simulated => write!(f, "simulated"),
            AdapterMode::Ssh => write!(f, "ssh"),
        }
    }
}

/// Username/password pair used to log in to a device
#[derive(Clone, PartialEq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Resolves a device's credential profile to concrete credentials
#[derive(Debug, Clone)]
pub struct CredentialProvider {
    default: Credentials,
    profiles: HashMap<String, Credentials>,
}

impl CredentialProvider {
    pub fn new(default: Credentials, profiles: HashMap<String, Credentials>) -> Self {
        Self { default, profiles }
    }

    /// Profile credentials when the profile is known, the defaults otherwise
    pub fn resolve(&self, profile: Option<&str>) -> Credentials {
        match profile {
            Some(name) => match self.profiles.get(name) {
                Some(creds) => creds.clone(),
                None => {
                    tracing::warn!("Unknown credential profile '{}', using defaults", name);
                    self.default.clone()
                }
            },
            None => self.default.clone(),
        }
    }
}

/// Config holds all application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: String,
    pub db_max_connections: u32,
    pub listen_addr: String,
    pub adapter_mode: AdapterMode,
    pub max_concurrency: usize,
    pub max_retries: u32,
    pub retry_backoff: Duration,
    pub job_timeout: Duration,
    pub batch_timeout: Duration,
    pub ssh_connect_timeout: Duration,
    pub default_ssh_user: String,
    pub default_ssh_pass: String,
    /// `name=user:pass` pairs separated by commas
    pub credential_profiles: String,
    pub status_check_interval: Duration,
}

impl Config {
    /// Load configuration from environment variables with defaults
    pub fn load() -> Self {
        Self {
            db_path: get_env("DB_PATH", "netswift.db"),
            db_max_connections: get_parsed("DB_MAX_CONNECTIONS", 5),
            listen_addr: get_env("LISTEN_ADDR", "0.0.0.0:5000"),
            adapter_mode: get_parsed("ADAPTER_MODE", AdapterMode::Simulated),
            max_concurrency: get_parsed::<usize>("MAX_CONCURRENCY", 5).max(1),
            max_retries: get_parsed("MAX_RETRIES", 2),
            retry_backoff: Duration::from_millis(get_parsed("RETRY_BACKOFF_MS", 1000)),
            job_timeout: Duration::from_secs(get_parsed("JOB_TIMEOUT_SECS", 60)),
            batch_timeout: Duration::from_secs(get_parsed("BATCH_TIMEOUT_SECS", 600)),
            ssh_connect_timeout: Duration::from_secs(get_parsed("SSH_CONNECT_TIMEOUT_SECS", 10)),
            default_ssh_user: get_env("DEFAULT_SSH_USER", "cisco"),
            default_ssh_pass: get_env("DEFAULT_SSH_PASS", "cisco"),
            credential_profiles: get_env("CREDENTIAL_PROFILES", ""),
            status_check_interval: Duration::from_secs(get_parsed("STATUS_CHECK_INTERVAL_SECS", 30)),
        }
    }

    /// Build the credential provider from the default login and profile list
    pub fn credential_provider(&self) -> CredentialProvider {
        let default = Credentials {
            username: self.default_ssh_user.clone(),
            password: self.default_ssh_pass.clone(),
        };
        CredentialProvider::new(default, parse_profiles(&self.credential_profiles))
    }
}

fn get_env(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Parse an env var, warning and falling back to `default` on bad input
fn get_parsed<T>(key: &str, default: T) -> T
where
    T: FromStr + std::fmt::Debug,
{
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!("Invalid value for {}: {:?}, using default {:?}", key, raw, default);
            default
        }),
        Err(_) => default,
    }
}

fn parse_profiles(raw: &str) -> HashMap<String, Credentials> {
    raw.split(',')
        .filter_map(|entry| {
            let (name, login) = entry.trim().split_once('=')?;
            let (username, password) = login.split_once(':')?;
            if name.is_empty() || username.is_empty() {
                return None;
            }
            Some((
                name.trim().to_string(),
                Credentials {
                    username: username.to_string(),
                    password: password.to_string(),
                },
            ))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_profiles_skips_malformed_entries() {
        let profiles = parse_profiles("lab=cisco:cisco, core=admin:s3:cret,broken,=x:y");
        assert_eq!(profiles.len(), 2);
        assert_eq!(profiles["core"].password, "s3:cret");
        assert_eq!(profiles["lab"].username, "cisco");
    }

    #[test]
    fn test_unknown_profile_falls_back_to_default() {
        let default = Credentials {
            username: "cisco".to_string(),
            password: "cisco".to_string(),
        };
        let provider = CredentialProvider::new(default.clone(), parse_profiles("core=admin:pw"));
        assert_eq!(provider.resolve(None), default);
        assert_eq!(provider.resolve(Some("missing")), default);
        assert_eq!(provider.resolve(Some("core")).username, "admin");
    }

    #[test]
    fn test_credentials_debug_hides_password() {
        let creds = Credentials {
            username: "ops".to_string(),
            password: "hunter2".to_string(),
        };
        assert!(!format!("{:?}", creds).contains("hunter2"));
    }

    #[test]
    fn test_adapter_mode_aliases() {
        assert_eq!("mock".parse::<AdapterMode>().unwrap(), AdapterMode::Simulated);
        assert_eq!("SSH".parse::<AdapterMode>().unwrap(), AdapterMode::Ssh);
        assert!("telnet".parse::<AdapterMode>().is_err());
    }
}
