// Configuration loading: credentials and endpoints from a TOML file region
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

pub const CONF_FILE_ENV: &str = "TANGIER_CONF_FILE";
pub const CONF_REGION_ENV: &str = "TANGIER_CONF_REGION";
pub const DEBUG_ENV: &str = "TANGIER_DEBUG";
pub const DEFAULT_REGION: &str = "tangier";
pub const DEFAULT_SOAP_NAMESPACE: &str = "http://tempuri.org/";
pub const DEFAULT_SOAP_PARAMETER: &str = "xmlString";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Missing configuration value: {0}")]
    MissingValue(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

// Trait for abstracting environment variable access
pub trait EnvProvider {
    fn get(&self, key: &str) -> Option<String>;
}

pub struct SystemEnvProvider;

impl EnvProvider for SystemEnvProvider {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

// The three Tangier SOAP services.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    Schedule,
    Provider,
    Location,
}

impl Service {
    pub fn endpoint_key(&self) -> &'static str {
        match self {
            Service::Schedule => "schedule_endpoint",
            Service::Provider => "provider_endpoint",
            Service::Location => "location_endpoint",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

// Named values read from one region of the config file. Anything the file does not
// set stays `None`; a missing file or region is not an error.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub username: Option<String>,
    pub password: Option<String>,
    pub schedule_endpoint: Option<String>,
    pub provider_endpoint: Option<String>,
    pub location_endpoint: Option<String>,
    pub testing_site: Option<String>,
    pub testing_npi: Option<String>,
    pub log_dir: Option<PathBuf>,
    pub debug: bool,
    pub soap_namespace: String,
    pub soap_parameter: String,
    pub timeout_seconds: u64,
    pub max_retries: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            username: None,
            password: None,
            schedule_endpoint: None,
            provider_endpoint: None,
            location_endpoint: None,
            testing_site: None,
            testing_npi: None,
            log_dir: None,
            debug: false,
            soap_namespace: DEFAULT_SOAP_NAMESPACE.to_string(),
            soap_parameter: DEFAULT_SOAP_PARAMETER.to_string(),
            timeout_seconds: 60,
            max_retries: 2,
        }
    }
}

impl Settings {
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with(&SystemEnvProvider)
    }

    pub fn load_with(env: &dyn EnvProvider) -> Result<Self, ConfigError> {
        let region = env
            .get(CONF_REGION_ENV)
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| DEFAULT_REGION.to_string());

        let mut settings = match env.get(CONF_FILE_ENV).filter(|f| !f.is_empty()) {
            Some(path) if Path::new(&path).exists() => Self::from_file(Path::new(&path), &region)?,
            Some(path) => {
                warn!(path = %path, "Tangier config file not found, using defaults");
                Self::default()
            }
            None => Self::default(),
        };

        if env.get(DEBUG_ENV).is_some_and(|v| !v.is_empty()) {
            settings.debug = true;
        }
        Ok(settings)
    }

    pub fn from_file(path: &Path, region: &str) -> Result<Self, ConfigError> {
        debug!(path = %path.display(), region, "Reading Tangier configuration");
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content, region)
    }

    pub fn from_toml_str(content: &str, region: &str) -> Result<Self, ConfigError> {
        let document: toml::Table = toml::from_str(content)?;
        let mut settings = Self::default();

        let Some(table) = document.get(region).and_then(toml::Value::as_table) else {
            debug!(region, "Region not present in configuration");
            return Ok(settings);
        };

        let get = |key: &str| table.get(key).and_then(scalar_to_string);

        settings.username = get("username");
        settings.password = get("password");
        settings.schedule_endpoint = get("schedule_endpoint");
        settings.provider_endpoint = get("provider_endpoint");
        settings.location_endpoint = get("location_endpoint");
        settings.testing_site = get("testing_site");
        settings.testing_npi = get("testing_npi");
        settings.log_dir = get("log_dir").map(PathBuf::from);
        if let Some(value) = table.get("debug") {
            settings.debug = match value {
                toml::Value::Boolean(flag) => *flag,
                other => scalar_to_string(other).is_some_and(|s| !s.is_empty()),
            };
        }
        if let Some(namespace) = get("soap_namespace") {
            settings.soap_namespace = namespace;
        }
        if let Some(parameter) = get("soap_parameter") {
            settings.soap_parameter = parameter;
        }
        if let Some(timeout) = get("timeout_seconds") {
            settings.timeout_seconds = parse_number("timeout_seconds", &timeout)?;
        }
        if let Some(retries) = get("max_retries") {
            settings.max_retries = parse_number("max_retries", &retries)?;
        }
        Ok(settings)
    }

    // Credentials for request templates. Unset values become empty strings.
    pub fn credentials(&self) -> Credentials {
        if self.username.is_none() || self.password.is_none() {
            warn!("Tangier username or password is not configured");
        }
        Credentials {
            username: self.username.clone().unwrap_or_default(),
            password: self.password.clone().unwrap_or_default(),
        }
    }

    pub fn endpoint(&self, service: Service) -> Result<String, ConfigError> {
        let endpoint = match service {
            Service::Schedule => &self.schedule_endpoint,
            Service::Provider => &self.provider_endpoint,
            Service::Location => &self.location_endpoint,
        };
        endpoint
            .clone()
            .ok_or_else(|| ConfigError::MissingValue(service.endpoint_key().to_string()))
    }
}

fn scalar_to_string(value: &toml::Value) -> Option<String> {
    match value {
        toml::Value::String(s) => Some(s.clone()),
        toml::Value::Integer(i) => Some(i.to_string()),
        toml::Value::Float(f) => Some(f.to_string()),
        toml::Value::Boolean(b) => Some(b.to_string()),
        _ => None,
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        message: e.to_string(),
    })
}
