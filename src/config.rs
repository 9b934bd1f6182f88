//! Relay configuration loaded from environment variables.
//!
//! Follows 12-factor style: all settings come from environment variables
//! (or a `.env` file via `dotenvy`). Every keepalive constant and queue
//! bound is configurable; nothing on the hot path is hard-coded.
//!
//! | Variable | Default |
//! |---|---|
//! | `LISTEN_ADDR` | `0.0.0.0:3000` |
//! | `WRITE_WAIT_SECS` | `10` |
//! | `PONG_WAIT_SECS` | `60` |
//! | `PING_PERIOD_SECS` | 9/10 of the pong wait |
//! | `OUTBOUND_QUEUE_CAPACITY` | `256` |
//! | `HUB_CAPACITY` | `0` (unbounded) |
//! | `HUB_EVENT_CAPACITY` | `1024` |
//! | `BROADCAST_ECHO` | `true` |
//! | `SESSION_GRACE_PERIOD_SECS` | `30` |
//! | `CLEANUP_INTERVAL_SECS` | `10` |
//! | `TRUST_PARTICIPANT_HEADER` | `false` |
//!
//! Timers must be non-zero (the grace period may be zero) and at most
//! [`MAX_DURATION`].

use std::net::{AddrParseError, SocketAddr};
use std::time::Duration;

/// Configuration errors detected at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// `LISTEN_ADDR` could not be parsed.
    #[error("invalid LISTEN_ADDR: {0}")]
    InvalidListenAddr(#[from] AddrParseError),

    /// The ping interval must be strictly shorter than the pong wait,
    /// otherwise healthy peers time out between pings.
    #[error("ping period {ping:?} must be shorter than pong wait {pong:?}")]
    PingPeriodTooLong {
        /// Configured ping period.
        ping: Duration,
        /// Configured pong wait.
        pong: Duration,
    },

    /// A bounded queue was configured with zero capacity.
    #[error("{0} must be greater than zero")]
    ZeroCapacity(&'static str),

    /// A timer was configured with a zero duration.
    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),

    /// A timer exceeds [`MAX_DURATION`].
    #[error("{key} must not exceed {max:?}, got {value:?}")]
    DurationTooLong {
        /// Offending variable.
        key: &'static str,
        /// Configured value.
        value: Duration,
        /// Upper bound.
        max: Duration,
    },
}

/// Upper bound for every configured timer (one day). Keeps deadline
/// arithmetic on `Instant` far from overflow.
pub const MAX_DURATION: Duration = Duration::from_secs(24 * 60 * 60);

/// Per-connection keepalive and queueing settings.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Deadline for writing a single frame to the peer.
    pub write_wait: Duration,
    /// Read deadline, extended by every pong.
    pub pong_wait: Duration,
    /// Interval between keepalive pings; shorter than `pong_wait`.
    pub ping_period: Duration,
    /// Capacity of each connection's outbound queue, in messages.
    pub outbound_queue_capacity: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        let pong_wait = Duration::from_secs(60);
        Self {
            write_wait: Duration::from_secs(10),
            pong_wait,
            ping_period: pong_wait * 9 / 10,
            outbound_queue_capacity: 256,
        }
    }
}

/// Per-session hub settings.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Maximum concurrent connections per session (0 = unbounded).
    pub capacity: usize,
    /// Capacity of the hub's inbound event queue.
    pub event_capacity: usize,
    /// Whether broadcasts are echoed back to their sender.
    pub echo: bool,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            capacity: 0,
            event_capacity: 1024,
            echo: true,
        }
    }
}

/// Top-level relay configuration.
///
/// Loaded once at startup via [`RelayConfig::from_env`].
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Socket address to bind the HTTP server to.
    pub listen_addr: SocketAddr,
    /// Keepalive and queue settings applied to every connection.
    pub connection: ConnectionConfig,
    /// Defaults for lazily created hubs.
    pub hub: HubConfig,
    /// How long an empty hub survives, to absorb quick reconnects.
    pub session_grace_period: Duration,
    /// Interval between idle-hub cleanup passes.
    pub cleanup_interval: Duration,
    /// Take participant ids from the `x-participant-id` header set by an
    /// authenticating proxy instead of assigning anonymous ones.
    pub trust_participant_header: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            connection: ConnectionConfig::default(),
            hub: HubConfig::default(),
            session_grace_period: Duration::from_secs(30),
            cleanup_interval: Duration::from_secs(10),
            trust_participant_header: false,
        }
    }
}

impl RelayConfig {
    /// Loads configuration from environment variables.
    ///
    /// Falls back to defaults when a variable is not set or unparsable.
    /// Calls `dotenvy::dotenv().ok()` to optionally load a `.env` file.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if `LISTEN_ADDR` is malformed or the
    /// resulting settings are inconsistent.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Same as [`RelayConfig::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let listen_addr = match lookup("LISTEN_ADDR") {
            Some(addr) => addr.parse()?,
            None => defaults.listen_addr,
        };

        let pong_wait = parse_secs(&lookup, "PONG_WAIT_SECS", defaults.connection.pong_wait);
        let connection = ConnectionConfig {
            write_wait: parse_secs(&lookup, "WRITE_WAIT_SECS", defaults.connection.write_wait),
            pong_wait,
            ping_period: parse_secs(
                &lookup,
                "PING_PERIOD_SECS",
                pong_wait.checked_mul(9).map_or(pong_wait, |d| d / 10),
            ),
            outbound_queue_capacity: parse(
                &lookup,
                "OUTBOUND_QUEUE_CAPACITY",
                defaults.connection.outbound_queue_capacity,
            ),
        };

        let hub = HubConfig {
            capacity: parse(&lookup, "HUB_CAPACITY", defaults.hub.capacity),
            event_capacity: parse(&lookup, "HUB_EVENT_CAPACITY", defaults.hub.event_capacity),
            echo: parse_bool(&lookup, "BROADCAST_ECHO", defaults.hub.echo),
        };

        let config = Self {
            listen_addr,
            connection,
            hub,
            session_grace_period: parse_secs(
                &lookup,
                "SESSION_GRACE_PERIOD_SECS",
                defaults.session_grace_period,
            ),
            cleanup_interval: parse_secs(
                &lookup,
                "CLEANUP_INTERVAL_SECS",
                defaults.cleanup_interval,
            ),
            trust_participant_header: parse_bool(
                &lookup,
                "TRUST_PARTICIPANT_HEADER",
                defaults.trust_participant_header,
            ),
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ZeroDuration`] or
    /// [`ConfigError::DurationTooLong`] for an unusable timer,
    /// [`ConfigError::PingPeriodTooLong`] if pings would not arrive within
    /// the pong wait, or [`ConfigError::ZeroCapacity`] for an unusable
    /// queue bound.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let conn = &self.connection;
        // A zero grace period retires empty hubs on the next cleanup pass.
        let timers = [
            ("WRITE_WAIT_SECS", conn.write_wait, false),
            ("PONG_WAIT_SECS", conn.pong_wait, false),
            ("PING_PERIOD_SECS", conn.ping_period, false),
            ("SESSION_GRACE_PERIOD_SECS", self.session_grace_period, true),
            ("CLEANUP_INTERVAL_SECS", self.cleanup_interval, false),
        ];
        for (key, value, zero_allowed) in timers {
            if value.is_zero() && !zero_allowed {
                return Err(ConfigError::ZeroDuration(key));
            }
            if value > MAX_DURATION {
                return Err(ConfigError::DurationTooLong {
                    key,
                    value,
                    max: MAX_DURATION,
                });
            }
        }
        if conn.ping_period >= conn.pong_wait {
            return Err(ConfigError::PingPeriodTooLong {
                ping: conn.ping_period,
                pong: conn.pong_wait,
            });
        }
        if conn.outbound_queue_capacity == 0 {
            return Err(ConfigError::ZeroCapacity("OUTBOUND_QUEUE_CAPACITY"));
        }
        if self.hub.event_capacity == 0 {
            return Err(ConfigError::ZeroCapacity("HUB_EVENT_CAPACITY"));
        }
        Ok(())
    }
}

/// Parses a variable as `T`, returning `default` on missing or invalid
/// values.
fn parse<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Parses a whole number of seconds.
fn parse_secs<F>(lookup: &F, key: &str, default: Duration) -> Duration
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .map_or(default, Duration::from_secs)
}

/// Parses a boolean. Accepts `"true"`, `"1"`, `"false"`, `"0"`
/// (case-insensitive). Returns `default` otherwise.
fn parse_bool<F>(lookup: &F, key: &str, default: bool) -> bool
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key).map(|v| v.trim().to_ascii_lowercase()).as_deref() {
        Some("true" | "1") => true,
        Some("false" | "0") => false,
        _ => default,
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<RelayConfig, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        RelayConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_match_keepalive_constants() {
        let Ok(config) = load(&[]) else {
            panic!("defaults must be valid");
        };
        assert_eq!(config.connection.write_wait, Duration::from_secs(10));
        assert_eq!(config.connection.pong_wait, Duration::from_secs(60));
        assert_eq!(config.connection.ping_period, Duration::from_secs(54));
        assert_eq!(config.connection.outbound_queue_capacity, 256);
        assert_eq!(config.hub.capacity, 0);
        assert!(config.hub.echo);
    }

    #[test]
    fn ping_period_follows_pong_wait() {
        let Ok(config) = load(&[("PONG_WAIT_SECS", "20")]) else {
            panic!("valid config");
        };
        assert_eq!(config.connection.ping_period, Duration::from_secs(18));
    }

    #[test]
    fn overrides_are_applied() {
        let Ok(config) = load(&[
            ("LISTEN_ADDR", "127.0.0.1:9000"),
            ("HUB_CAPACITY", "8"),
            ("BROADCAST_ECHO", "FALSE"),
            ("OUTBOUND_QUEUE_CAPACITY", "16"),
            ("TRUST_PARTICIPANT_HEADER", "true"),
        ]) else {
            panic!("valid config");
        };
        assert_eq!(config.listen_addr.port(), 9000);
        assert!(config.trust_participant_header);
        assert_eq!(config.hub.capacity, 8);
        assert!(!config.hub.echo);
        assert_eq!(config.connection.outbound_queue_capacity, 16);
    }

    #[test]
    fn unparsable_values_fall_back_to_defaults() {
        let Ok(config) = load(&[("HUB_CAPACITY", "lots"), ("BROADCAST_ECHO", "maybe")]) else {
            panic!("valid config");
        };
        assert_eq!(config.hub.capacity, 0);
        assert!(config.hub.echo);
    }

    #[test]
    fn rejects_ping_period_not_below_pong_wait() {
        let result = load(&[("PONG_WAIT_SECS", "30"), ("PING_PERIOD_SECS", "30")]);
        assert!(matches!(result, Err(ConfigError::PingPeriodTooLong { .. })));
    }

    #[test]
    fn rejects_zero_queue_capacity() {
        let result = load(&[("OUTBOUND_QUEUE_CAPACITY", "0")]);
        assert!(matches!(result, Err(ConfigError::ZeroCapacity(_))));
    }

    #[test]
    fn rejects_zero_timers() {
        for key in [
            "PING_PERIOD_SECS",
            "WRITE_WAIT_SECS",
            "PONG_WAIT_SECS",
            "CLEANUP_INTERVAL_SECS",
        ] {
            let result = load(&[(key, "0")]);
            let Err(ConfigError::ZeroDuration(rejected)) = result else {
                panic!("{key}=0 must be rejected, got {result:?}");
            };
            assert_eq!(rejected, key);
        }
    }

    #[test]
    fn zero_grace_period_is_allowed() {
        let Ok(config) = load(&[("SESSION_GRACE_PERIOD_SECS", "0")]) else {
            panic!("valid config");
        };
        assert!(config.session_grace_period.is_zero());
    }

    #[test]
    fn huge_pong_wait_is_an_error_not_a_panic() {
        let result = load(&[("PONG_WAIT_SECS", "18446744073709551615")]);
        let Err(ConfigError::DurationTooLong { key, max, .. }) = result else {
            panic!("expected DurationTooLong, got {result:?}");
        };
        assert_eq!(key, "PONG_WAIT_SECS");
        assert_eq!(max, MAX_DURATION);
    }

    #[test]
    fn timers_above_one_day_are_rejected() {
        let result = load(&[("CLEANUP_INTERVAL_SECS", "86401")]);
        assert!(matches!(
            result,
            Err(ConfigError::DurationTooLong {
                key: "CLEANUP_INTERVAL_SECS",
                ..
            })
        ));
    }

    #[test]
    fn rejects_bad_listen_addr() {
        let result = load(&[("LISTEN_ADDR", "nowhere")]);
        assert!(matches!(result, Err(ConfigError::InvalidListenAddr(_))));
    }
}
