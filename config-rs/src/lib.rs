//! config-rs/lib.rs
//! Shared configuration for the prompt-loop and self-heal services.
//! Provides the control-loop tunables plus standardized port/address helpers.

use std::env;
use std::net::{Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::sync::Once;
use std::time::Duration;

pub const DEFAULT_AUTO_APPLY_THRESHOLD: f64 = 0.85;
pub const DEFAULT_MIN_FIELDS_BEFORE_BOOKING: usize = 4;
pub const DEFAULT_CALL_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_BATCH_LIMIT: usize = 50;
pub const DEFAULT_FAILURE_THRESHOLD: usize = 3;
pub const DEFAULT_FAILURE_WINDOW_SECS: u64 = 60;
pub const DEFAULT_SNAPSHOT_STALENESS_SECS: u64 = 300;
pub const DEFAULT_INCIDENT_WINDOW_HOURS: i64 = 24;

static DOTENV: Once = Once::new();

/// Load `.env` once per process. Missing files are fine.
pub fn load_dotenv() {
    DOTENV.call_once(|| {
        if let Err(err) = dotenv::dotenv() {
            log::debug!("no .env file loaded: {}", err);
        }
    });
}

/// Tunables for the transcript-evaluation loop and the self-healing loop.
///
/// There is exactly one auto-apply threshold in the system; every call site
/// that decides between auto-apply and queueing reads it from here.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopConfig {
    /// Minimum confidence score for a suggested patch to be applied without review.
    pub auto_apply_threshold: f64,
    /// Number of captured fields required before a booking phrase is allowed.
    pub min_fields_before_booking: usize,
    /// Deadline applied to every store call.
    pub call_timeout: Duration,
    /// Default number of call logs pulled by one batch run.
    pub batch_limit: usize,
    /// Failed health checks needed inside `failure_window` before recovery acts.
    pub failure_threshold: usize,
    pub failure_window: Duration,
    /// Snapshots younger than this are not trusted as a recovery baseline.
    pub snapshot_staleness: Duration,
    /// Lookback for incident listings and summaries.
    pub incident_window_hours: i64,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            auto_apply_threshold: DEFAULT_AUTO_APPLY_THRESHOLD,
            min_fields_before_booking: DEFAULT_MIN_FIELDS_BEFORE_BOOKING,
            call_timeout: Duration::from_millis(DEFAULT_CALL_TIMEOUT_MS),
            batch_limit: DEFAULT_BATCH_LIMIT,
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            failure_window: Duration::from_secs(DEFAULT_FAILURE_WINDOW_SECS),
            snapshot_staleness: Duration::from_secs(DEFAULT_SNAPSHOT_STALENESS_SECS),
            incident_window_hours: DEFAULT_INCIDENT_WINDOW_HOURS,
        }
    }
}

impl LoopConfig {
    /// Construct configuration from the process environment (and `.env`).
    ///
    /// Never panics: unparsable values are logged and replaced by defaults.
    pub fn from_env() -> Self {
        load_dotenv();
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Construct configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let threshold: f64 = parse_or(
            &lookup,
            "PROMPT_LOOP_AUTO_APPLY_THRESHOLD",
            defaults.auto_apply_threshold,
        );
        let threshold = if threshold.is_finite() {
            threshold.clamp(0.0, 1.0)
        } else {
            log::warn!("non-finite PROMPT_LOOP_AUTO_APPLY_THRESHOLD, using default");
            defaults.auto_apply_threshold
        };

        Self {
            auto_apply_threshold: threshold,
            min_fields_before_booking: parse_or(
                &lookup,
                "PROMPT_LOOP_MIN_FIELDS_BEFORE_BOOKING",
                defaults.min_fields_before_booking,
            ),
            call_timeout: Duration::from_millis(parse_or(
                &lookup,
                "PROMPT_LOOP_CALL_TIMEOUT_MS",
                DEFAULT_CALL_TIMEOUT_MS,
            )),
            batch_limit: parse_or(&lookup, "PROMPT_LOOP_BATCH_LIMIT", defaults.batch_limit),
            failure_threshold: parse_or(
                &lookup,
                "SELF_HEAL_FAILURE_THRESHOLD",
                defaults.failure_threshold,
            ),
            failure_window: Duration::from_secs(parse_or(
                &lookup,
                "SELF_HEAL_FAILURE_WINDOW_SECS",
                DEFAULT_FAILURE_WINDOW_SECS,
            )),
            snapshot_staleness: Duration::from_secs(parse_or(
                &lookup,
                "SELF_HEAL_SNAPSHOT_STALENESS_SECS",
                DEFAULT_SNAPSHOT_STALENESS_SECS,
            )),
            incident_window_hours: parse_or(
                &lookup,
                "SELF_HEAL_INCIDENT_WINDOW_HOURS",
                defaults.incident_window_hours,
            ),
        }
    }
}

fn parse_or<F, T>(lookup: &F, name: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + Copy + std::fmt::Display,
{
    match lookup(name) {
        Some(raw) => raw.trim().parse::<T>().unwrap_or_else(|_| {
            log::warn!("Invalid value {:?} in {}, using default {}", raw, name, default);
            default
        }),
        None => default,
    }
}

/// Get service port from environment variables with proper fallback
///
/// # Arguments
/// * `service_name` - The name of the service (e.g., "API_GATEWAY")
/// * `default_port` - The default port to use if not specified in environment
pub fn get_service_port(service_name: &str, default_port: u16) -> u16 {
    let var_name = format!("{}_SERVICE_PORT", service_name.to_uppercase());
    match env::var(&var_name) {
        Ok(raw) => raw.parse::<u16>().unwrap_or_else(|_| {
            log::warn!("Invalid port in {}, using default {}", var_name, default_port);
            default_port
        }),
        Err(_) => default_port,
    }
}

/// Create a SocketAddr for binding a service
///
/// `<SERVICE>_SERVICE_ADDR` wins when it parses (plain or `http://host:port`),
/// otherwise binds all interfaces on the configured port.
pub fn get_bind_address(service_name: &str, default_port: u16) -> SocketAddr {
    let var_name = format!("{}_SERVICE_ADDR", service_name.to_uppercase());

    if let Ok(addr_str) = env::var(&var_name) {
        let trimmed = addr_str
            .strip_prefix("http://")
            .or_else(|| addr_str.strip_prefix("https://"))
            .unwrap_or(&addr_str);
        match trimmed.parse::<SocketAddr>() {
            Ok(addr) => return addr,
            Err(_) => log::warn!("Invalid address format in {}, using default", var_name),
        }
    }

    let port = get_service_port(service_name, default_port);
    SocketAddr::from((Ipv4Addr::UNSPECIFIED, port))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_match_documented_constants() {
        let cfg = LoopConfig::from_lookup(|_| None);
        assert_eq!(cfg, LoopConfig::default());
        assert!((cfg.auto_apply_threshold - 0.85).abs() < f64::EPSILON);
        assert_eq!(cfg.min_fields_before_booking, 4);
        assert_eq!(cfg.failure_threshold, 3);
        assert_eq!(cfg.failure_window, Duration::from_secs(60));
        assert_eq!(cfg.snapshot_staleness, Duration::from_secs(300));
    }

    #[test]
    fn overrides_are_parsed() {
        let cfg = LoopConfig::from_lookup(lookup_from(&[
            ("PROMPT_LOOP_AUTO_APPLY_THRESHOLD", "0.5"),
            ("PROMPT_LOOP_CALL_TIMEOUT_MS", "250"),
            ("SELF_HEAL_FAILURE_THRESHOLD", "5"),
        ]));
        assert!((cfg.auto_apply_threshold - 0.5).abs() < f64::EPSILON);
        assert_eq!(cfg.call_timeout, Duration::from_millis(250));
        assert_eq!(cfg.failure_threshold, 5);
    }

    #[test]
    fn invalid_values_fall_back_and_threshold_is_clamped() {
        let cfg = LoopConfig::from_lookup(lookup_from(&[
            ("PROMPT_LOOP_AUTO_APPLY_THRESHOLD", "7"),
            ("PROMPT_LOOP_BATCH_LIMIT", "lots"),
        ]));
        assert!((cfg.auto_apply_threshold - 1.0).abs() < f64::EPSILON);
        assert_eq!(cfg.batch_limit, DEFAULT_BATCH_LIMIT);
    }

    #[test]
    fn test_get_service_port() {
        std::env::set_var("PORTTEST_SERVICE_PORT", "9000");
        assert_eq!(get_service_port("PORTTEST", 8000), 9000);

        std::env::remove_var("UNKNOWN_SERVICE_PORT");
        assert_eq!(get_service_port("UNKNOWN", 8000), 8000);
    }

    #[test]
    fn test_get_bind_address() {
        std::env::set_var("BINDTEST_SERVICE_ADDR", "http://127.0.0.1:9100");
        assert_eq!(
            get_bind_address("BINDTEST", 8000),
            "127.0.0.1:9100".parse::<SocketAddr>().unwrap()
        );

        std::env::remove_var("BINDDEFAULT_SERVICE_ADDR");
        std::env::remove_var("BINDDEFAULT_SERVICE_PORT");
        assert_eq!(get_bind_address("BINDDEFAULT", 8282).port(), 8282);
    }
}
