use std::env;
use std::path::PathBuf;

/// Server configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host (default: 0.0.0.0)
    pub host: String,
    /// Server port (default: 3030)
    pub port: u16,
    /// Directory holding page templates, `<page>.html` per page (default: ./pages)
    pub pages_dir: PathBuf,
    /// Optional directory of static assets served under /public
    pub public_dir: Option<PathBuf>,
    /// Session cookie lifetime in days (default: 30)
    pub session_cookie_days: i64,
    /// Hours of inactivity before a disconnected session is swept (default: 24)
    pub session_max_idle_hours: i64,
    /// Seconds between staleness sweeps (default: 3600)
    pub sweep_interval_secs: u64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("PORT")
            .unwrap_or_else(|_| "3030".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidPort)?;

        let pages_dir =
            PathBuf::from(env::var("PAGES_DIR").unwrap_or_else(|_| "./pages".to_string()));

        let public_dir = env::var("PUBLIC_DIR")
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);

        let session_cookie_days = env::var("SESSION_COOKIE_DAYS")
            .unwrap_or_else(|_| "30".to_string())
            .parse()
            .unwrap_or(30);

        let session_max_idle_hours = env::var("SESSION_MAX_IDLE_HOURS")
            .unwrap_or_else(|_| "24".to_string())
            .parse()
            .unwrap_or(24);

        let sweep_interval_secs = env::var("SWEEP_INTERVAL_SECS")
            .unwrap_or_else(|_| "3600".to_string())
            .parse()
            .unwrap_or(3600);

        Ok(Config {
            host,
            port,
            pages_dir,
            public_dir,
            session_cookie_days,
            session_max_idle_hours,
            sweep_interval_secs,
        })
    }

    /// Get the server address
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            host: "0.0.0.0".to_string(),
            port: 3030,
            pages_dir: PathBuf::from("./pages"),
            public_dir: None,
            session_cookie_days: 30,
            session_max_idle_hours: 24,
            sweep_interval_secs: 3600,
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "Invalid PORT environment variable"),
        }
    }
}

impl std::error::Error for ConfigError {}
