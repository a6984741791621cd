// swarm-autoscaler: Environment configuration

use std::env;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_MIN_PERCENTAGE: f64 = 25.0;
const DEFAULT_MAX_PERCENTAGE: f64 = 85.0;
const DEFAULT_DISCOVERY_DNSNAME: &str = "tasks.autoscaler";
const DEFAULT_CHECK_INTERVAL_SECS: u64 = 60 * 5;
const DEFAULT_DISCOVERY_WORKERS: usize = 8;
const DEFAULT_SCALE_COOLDOWN_SECS: u64 = 60;
const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:80";
const DEFAULT_LOCK_FILE: &str = "/tmp/swarm-autoscaler.lock";
const DEFAULT_EVENTS_DB_PATH: &str = "/app/events.db";
const DEFAULT_EVENTS_MAX_ROWS: usize = 10_000;

/// Runtime configuration, loaded once from the environment at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Global low watermark applied when a service carries no label
    pub min_percentage: f64,
    /// Global high watermark applied when a service carries no label
    pub max_percentage: f64,
    /// DNS name resolving to one A record per autoscaler instance
    pub discovery_dns_name: String,
    /// Control tick interval
    pub check_interval: Duration,
    /// Concurrent peer queries during the stats fan-out
    pub discovery_workers: usize,
    /// Minimum gap between two scale actions for the same service
    pub scale_cooldown: Duration,
    /// Skip orchestrator write calls, still record audit events
    pub dry_run: bool,
    /// HTTP surface bind address
    pub listen_addr: String,
    /// Singleton advisory-lock path
    pub lock_file: PathBuf,
    /// Audit event store location
    pub events_db_path: PathBuf,
    /// Audit retention: oldest rows evicted past this count
    pub events_max_rows: usize,
}

impl Settings {
    pub fn from_env() -> Self {
        Self {
            min_percentage: env_parse("AUTOSCALER_MIN_PERCENTAGE", DEFAULT_MIN_PERCENTAGE),
            max_percentage: env_parse("AUTOSCALER_MAX_PERCENTAGE", DEFAULT_MAX_PERCENTAGE),
            discovery_dns_name: env::var("AUTOSCALER_DNSNAME")
                .unwrap_or_else(|_| DEFAULT_DISCOVERY_DNSNAME.to_string()),
            check_interval: Duration::from_secs(env_parse(
                "AUTOSCALER_INTERVAL",
                DEFAULT_CHECK_INTERVAL_SECS,
            )),
            discovery_workers: env_parse("AUTOSCALER_DISCOVERY_WORKERS", DEFAULT_DISCOVERY_WORKERS)
                .max(1),
            scale_cooldown: Duration::from_secs(env_parse(
                "SCALE_COOLDOWN_SEC",
                DEFAULT_SCALE_COOLDOWN_SECS,
            )),
            dry_run: env_bool("AUTOSCALER_DRYRUN", false),
            listen_addr: env::var("LISTEN_ADDR").unwrap_or_else(|_| DEFAULT_LISTEN_ADDR.to_string()),
            lock_file: PathBuf::from(
                env::var("AUTOSCALER_LOCK_FILE").unwrap_or_else(|_| DEFAULT_LOCK_FILE.to_string()),
            ),
            events_db_path: PathBuf::from(
                env::var("EVENTS_DB_PATH").unwrap_or_else(|_| DEFAULT_EVENTS_DB_PATH.to_string()),
            ),
            events_max_rows: env_parse("EVENTS_MAX_ROWS", DEFAULT_EVENTS_MAX_ROWS),
        }
    }

    /// Port of the HTTP surface, used to address peers during the fan-out.
    pub fn listen_port(&self) -> u16 {
        self.listen_addr
            .rsplit(':')
            .next()
            .and_then(|p| p.parse().ok())
            .unwrap_or(80)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            min_percentage: DEFAULT_MIN_PERCENTAGE,
            max_percentage: DEFAULT_MAX_PERCENTAGE,
            discovery_dns_name: DEFAULT_DISCOVERY_DNSNAME.to_string(),
            check_interval: Duration::from_secs(DEFAULT_CHECK_INTERVAL_SECS),
            discovery_workers: DEFAULT_DISCOVERY_WORKERS,
            scale_cooldown: Duration::from_secs(DEFAULT_SCALE_COOLDOWN_SECS),
            dry_run: false,
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            lock_file: PathBuf::from(DEFAULT_LOCK_FILE),
            events_db_path: PathBuf::from(DEFAULT_EVENTS_DB_PATH),
            events_max_rows: DEFAULT_EVENTS_MAX_ROWS,
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Truthy values: 1/true/yes/on. Anything else (or unset) is the default.
fn env_bool(name: &str, default: bool) -> bool {
    match env::var(name) {
        Ok(v) => match v.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" | "" => false,
            _ => default,
        },
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let settings = Settings::default();
        assert_eq!(settings.min_percentage, 25.0);
        assert_eq!(settings.max_percentage, 85.0);
        assert_eq!(settings.discovery_dns_name, "tasks.autoscaler");
        assert_eq!(settings.check_interval, Duration::from_secs(300));
        assert!(!settings.dry_run);
        assert_eq!(settings.events_max_rows, 10_000);
    }

    #[test]
    fn listen_port_parses_authority() {
        let mut settings = Settings::default();
        assert_eq!(settings.listen_port(), 80);
        settings.listen_addr = "0.0.0.0:8080".to_string();
        assert_eq!(settings.listen_port(), 8080);
        settings.listen_addr = "garbage".to_string();
        assert_eq!(settings.listen_port(), 80);
    }

    #[test]
    fn env_bool_truthy_set() {
        std::env::set_var("AUTOSCALER_TEST_FLAG", "yes");
        assert!(env_bool("AUTOSCALER_TEST_FLAG", false));
        std::env::set_var("AUTOSCALER_TEST_FLAG", "off");
        assert!(!env_bool("AUTOSCALER_TEST_FLAG", true));
        std::env::remove_var("AUTOSCALER_TEST_FLAG");
        assert!(!env_bool("AUTOSCALER_TEST_FLAG", false));
    }
}
