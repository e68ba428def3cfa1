use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use crate::workflows::attendance::Coordinates;

/// Distinguishes runtime behavior for different stages of the kiosk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the kiosk and the attendance pipeline.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub remote: RemoteConfig,
    pub pipeline: PipelineConfig,
    pub devices: DeviceConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let remote = RemoteConfig {
            base_url: env::var("HR_API_BASE_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:8000/api".to_string())
                .trim_end_matches('/')
                .to_string(),
            username: env::var("HR_API_USERNAME").unwrap_or_default(),
            password: env::var("HR_API_PASSWORD").unwrap_or_default(),
            timeout: Duration::from_secs(parse_number("HR_API_TIMEOUT_SECS", 15)?),
        };

        let match_threshold = match env::var("FACE_MATCH_THRESHOLD") {
            Ok(raw) => raw
                .trim()
                .parse::<f32>()
                .ok()
                .filter(|value| *value > 0.0 && value.is_finite())
                .ok_or(ConfigError::InvalidThreshold { value: raw })?,
            Err(_) => PipelineConfig::DEFAULT_MATCH_THRESHOLD,
        };

        let pipeline = PipelineConfig {
            match_threshold,
            geolocation_timeout: Duration::from_millis(parse_number(
                "GEOLOCATION_TIMEOUT_MS",
                5_000,
            )?),
            scan_interval: Duration::from_millis(parse_number("SCAN_INTERVAL_MS", 250)?),
        };

        let devices = DeviceConfig {
            vision_base_url: env::var("VISION_API_BASE_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:8600".to_string())
                .trim_end_matches('/')
                .to_string(),
            camera_spool_dir: PathBuf::from(
                env::var("CAMERA_SPOOL_DIR").unwrap_or_else(|_| "/var/spool/kiosk-camera".into()),
            ),
            fixed_location: parse_location()?,
        };

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
            remote,
            pipeline,
            devices,
        })
    }
}

fn parse_number(key: &'static str, default: u64) -> Result<u64, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map_err(|_| ConfigError::InvalidNumber { key, value: raw }),
        Err(_) => Ok(default),
    }
}

fn parse_location() -> Result<Option<Coordinates>, ConfigError> {
    let latitude = env::var("KIOSK_LATITUDE").ok();
    let longitude = env::var("KIOSK_LONGITUDE").ok();

    match (latitude, longitude) {
        (None, None) => Ok(None),
        (Some(lat), Some(lon)) => {
            let latitude = lat.trim().parse::<f64>().ok();
            let longitude = lon.trim().parse::<f64>().ok();
            match (latitude, longitude) {
                (Some(latitude), Some(longitude))
                    if (-90.0..=90.0).contains(&latitude)
                        && (-180.0..=180.0).contains(&longitude) =>
                {
                    Ok(Some(Coordinates {
                        latitude,
                        longitude,
                    }))
                }
                _ => Err(ConfigError::InvalidLocation),
            }
        }
        _ => Err(ConfigError::InvalidLocation),
    }
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Tracing controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

/// Connection settings for the HR REST service.
#[derive(Clone)]
pub struct RemoteConfig {
    pub base_url: String,
    pub username: String,
    pub password: String,
    pub timeout: Duration,
}

impl fmt::Debug for RemoteConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteConfig")
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Tunables for the verification gates.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub match_threshold: f32,
    pub geolocation_timeout: Duration,
    pub scan_interval: Duration,
}

impl PipelineConfig {
    pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.6;
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            match_threshold: Self::DEFAULT_MATCH_THRESHOLD,
            geolocation_timeout: Duration::from_secs(5),
            scan_interval: Duration::from_millis(250),
        }
    }
}

/// Where the kiosk finds its capture devices.
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    pub vision_base_url: String,
    pub camera_spool_dir: PathBuf,
    pub fixed_location: Option<Coordinates>,
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidNumber { key: &'static str, value: String },
    InvalidThreshold { value: String },
    InvalidLocation,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidNumber { key, value } => {
                write!(f, "{key} must be a non-negative integer (got '{value}')")
            }
            ConfigError::InvalidThreshold { value } => {
                write!(
                    f,
                    "FACE_MATCH_THRESHOLD must be a positive number (got '{value}')"
                )
            }
            ConfigError::InvalidLocation => write!(
                f,
                "KIOSK_LATITUDE and KIOSK_LONGITUDE must both be set to valid degrees"
            ),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidHost { source } => Some(source),
            ConfigError::InvalidPort
            | ConfigError::InvalidNumber { .. }
            | ConfigError::InvalidThreshold { .. }
            | ConfigError::InvalidLocation => None,
        }
    }
}
