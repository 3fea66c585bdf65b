use log::warn;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Bearer credentials for the job service. Handed to the client at
/// construction instead of being looked up from process-wide storage.
#[derive(Debug, Clone, Default)]
pub struct Session {
    pub access_token: Option<String>,
}

impl Session {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: Some(access_token.into()),
        }
    }

    pub fn anonymous() -> Self {
        Self { access_token: None }
    }
}

#[derive(Debug, Clone)]
pub struct PollConfig {
    pub interval: Duration,
    pub settle_delay: Duration,
    /// Extra result fetches after a `NotReady`, each preceded by the settle delay.
    pub result_fetch_retries: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(1000),
            settle_delay: Duration::from_millis(1000),
            result_fetch_retries: 2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub backend_url: String,
    pub session: Session,
    pub request_timeout: Duration,
    pub poll: PollConfig,
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = PollConfig::default();

        Self {
            backend_url: env::var("BACKEND_URL")
                .unwrap_or_else(|_| "http://localhost:8000".to_string())
                .trim_end_matches('/')
                .to_string(),
            session: Session {
                access_token: env::var("ACCESS_TOKEN").ok().filter(|t| !t.is_empty()),
            },
            request_timeout: Duration::from_secs(env_number("REQUEST_TIMEOUT_SECS", 30)),
            poll: PollConfig {
                interval: env_millis("POLL_INTERVAL_MS", defaults.interval),
                settle_delay: env_millis("SETTLE_DELAY_MS", defaults.settle_delay),
                result_fetch_retries: env_number("RESULT_FETCH_RETRIES", defaults.result_fetch_retries),
            },
        }
    }
}

fn env_number<T: FromStr>(key: &str, default: T) -> T {
    parse_number(key, env::var(key).ok().as_deref(), default)
}

fn env_millis(key: &str, default: Duration) -> Duration {
    parse_millis(key, env::var(key).ok().as_deref(), default)
}

fn parse_number<T: FromStr>(key: &str, raw: Option<&str>, default: T) -> T {
    let Some(raw) = raw else {
        return default;
    };
    raw.trim().parse::<T>().unwrap_or_else(|_| {
        warn!("Ignoring invalid {}={:?}, using default", key, raw);
        default
    })
}

/// Zero is rejected: a timer cadence of zero cannot be scheduled.
fn parse_millis(key: &str, raw: Option<&str>, default: Duration) -> Duration {
    match parse_number::<u64>(key, raw, 0) {
        0 => {
            if raw.is_some() {
                warn!("{} must be greater than zero, using {:?}", key, default);
            }
            default
        }
        ms => Duration::from_millis(ms),
    }
}
