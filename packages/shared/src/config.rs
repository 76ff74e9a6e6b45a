use std::time::Duration as StdDuration;

use chrono::Duration;

pub const DEFAULT_TICKET_TTL_SECONDS: i64 = 30;
pub const DEFAULT_LOCK_LEASE_SECONDS: u64 = 10;
pub const DEFAULT_LOCK_WAIT_MILLIS: u64 = 5_000;
pub const DEFAULT_CONNECT_TIMEOUT_SECONDS: u64 = 3;
pub const DEFAULT_PROMOTION_PIECES: &str = "qrbn";
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8000";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Memory,
    DynamoDb,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableNames {
    pub tickets: String,
    pub players: String,
    pub matches: String,
    pub games: String,
    pub moves: String,
}

impl Default for TableNames {
    fn default() -> Self {
        TableNames {
            tickets: "tickets".to_string(),
            players: "players".to_string(),
            matches: "matches".to_string(),
            games: "games".to_string(),
            moves: "moves".to_string(),
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum ConfigError {
    Missing(String),
    Invalid { key: String, value: String, reason: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Missing(key) => write!(f, "{} environment variable must be set", key),
            ConfigError::Invalid { key, value, reason } => {
                write!(f, "Invalid value '{}' for {}: {}", value, key, reason)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Process-wide settings, resolved once at startup and shared read-only.
#[derive(Debug, Clone)]
pub struct Config {
    pub ticket_ttl: Duration,
    pub store_backend: StoreBackend,
    pub tables: TableNames,
    pub lock_lease: StdDuration,
    pub lock_wait: StdDuration,
    pub connect_timeout: StdDuration,
    /// Lowercase promotion letters accepted as the optional fifth move character.
    pub promotion_pieces: Vec<char>,
    pub log_level: tracing::Level,
    pub listen_addr: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            ticket_ttl: Duration::seconds(DEFAULT_TICKET_TTL_SECONDS),
            store_backend: StoreBackend::DynamoDb,
            tables: TableNames::default(),
            lock_lease: StdDuration::from_secs(DEFAULT_LOCK_LEASE_SECONDS),
            lock_wait: StdDuration::from_millis(DEFAULT_LOCK_WAIT_MILLIS),
            connect_timeout: StdDuration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECONDS),
            promotion_pieces: DEFAULT_PROMOTION_PIECES.chars().collect(),
            log_level: tracing::Level::INFO,
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();

        let ttl_seconds = parse_or(&lookup, "TICKET_TTL_SECONDS", DEFAULT_TICKET_TTL_SECONDS)?;
        if ttl_seconds <= 0 {
            return Err(invalid("TICKET_TTL_SECONDS", &ttl_seconds.to_string(), "must be positive"));
        }

        let store_backend = match lookup("STORE_BACKEND").as_deref() {
            None => defaults.store_backend,
            Some("dynamodb") => StoreBackend::DynamoDb,
            Some("memory") => StoreBackend::Memory,
            Some(other) => {
                return Err(invalid("STORE_BACKEND", other, "expected 'memory' or 'dynamodb'"))
            }
        };

        let tables = match store_backend {
            StoreBackend::DynamoDb => TableNames {
                tickets: required(&lookup, "TICKETS_TABLE")?,
                players: required(&lookup, "PLAYERS_TABLE")?,
                matches: required(&lookup, "MATCHES_TABLE")?,
                games: required(&lookup, "GAMES_TABLE")?,
                moves: required(&lookup, "MOVES_TABLE")?,
            },
            StoreBackend::Memory => defaults.tables,
        };

        let promotion_pieces = match lookup("PROMOTION_PIECES") {
            Some(letters) => parse_promotion_pieces(&letters)?,
            None => defaults.promotion_pieces,
        };

        let log_level = match lookup("LOG_LEVEL") {
            Some(level) => level
                .parse::<tracing::Level>()
                .map_err(|e| invalid("LOG_LEVEL", &level, &e.to_string()))?,
            None => defaults.log_level,
        };

        Ok(Config {
            ticket_ttl: Duration::seconds(ttl_seconds),
            store_backend,
            tables,
            lock_lease: StdDuration::from_secs(parse_or(
                &lookup,
                "LOCK_LEASE_SECONDS",
                DEFAULT_LOCK_LEASE_SECONDS,
            )?),
            lock_wait: StdDuration::from_millis(parse_or(
                &lookup,
                "LOCK_WAIT_MILLIS",
                DEFAULT_LOCK_WAIT_MILLIS,
            )?),
            connect_timeout: StdDuration::from_secs(parse_or(
                &lookup,
                "CONNECT_TIMEOUT_SECONDS",
                DEFAULT_CONNECT_TIMEOUT_SECONDS,
            )?),
            promotion_pieces,
            log_level,
            listen_addr: lookup("LISTEN_ADDR").unwrap_or(defaults.listen_addr),
        })
    }
}

fn required<F>(lookup: &F, key: &str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(ConfigError::Missing(key.to_string())),
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| invalid(key, &raw, &e.to_string())),
        None => Ok(default),
    }
}

fn parse_promotion_pieces(letters: &str) -> Result<Vec<char>, ConfigError> {
    let mut pieces = Vec::new();
    for letter in letters.chars().map(|c| c.to_ascii_lowercase()) {
        if !DEFAULT_PROMOTION_PIECES.contains(letter) {
            return Err(invalid(
                "PROMOTION_PIECES",
                letters,
                "only q, r, b and n are promotion pieces",
            ));
        }
        if !pieces.contains(&letter) {
            pieces.push(letter);
        }
    }
    Ok(pieces)
}

fn invalid(key: &str, value: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_memory_backend_defaults() {
        let config = Config::from_lookup(lookup_from(&[("STORE_BACKEND", "memory")])).unwrap();

        assert_eq!(config.store_backend, StoreBackend::Memory);
        assert_eq!(config.ticket_ttl, Duration::seconds(30));
        assert_eq!(config.tables, TableNames::default());
        assert_eq!(config.promotion_pieces, vec!['q', 'r', 'b', 'n']);
        assert_eq!(config.log_level, tracing::Level::INFO);
    }

    #[test]
    fn test_dynamodb_backend_requires_tables() {
        let result = Config::from_lookup(lookup_from(&[("TICKETS_TABLE", "tickets")]));

        assert_eq!(
            result.unwrap_err(),
            ConfigError::Missing("PLAYERS_TABLE".to_string())
        );
    }

    #[test]
    fn test_dynamodb_backend_reads_tables() {
        let config = Config::from_lookup(lookup_from(&[
            ("TICKETS_TABLE", "t"),
            ("PLAYERS_TABLE", "p"),
            ("MATCHES_TABLE", "m"),
            ("GAMES_TABLE", "g"),
            ("MOVES_TABLE", "mv"),
            ("TICKET_TTL_SECONDS", "45"),
            ("LOCK_WAIT_MILLIS", "250"),
        ]))
        .unwrap();

        assert_eq!(config.store_backend, StoreBackend::DynamoDb);
        assert_eq!(config.store_backend, Config::default().store_backend);
        assert_eq!(config.tables.moves, "mv");
        assert_eq!(config.ticket_ttl, Duration::seconds(45));
        assert_eq!(config.lock_wait, StdDuration::from_millis(250));
    }

    #[test]
    fn test_rejects_non_positive_ttl() {
        let result = Config::from_lookup(lookup_from(&[
            ("STORE_BACKEND", "memory"),
            ("TICKET_TTL_SECONDS", "0"),
        ]));

        assert!(matches!(result, Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn test_rejects_unknown_backend_and_bad_numbers() {
        assert!(Config::from_lookup(lookup_from(&[("STORE_BACKEND", "postgres")])).is_err());
        assert!(Config::from_lookup(lookup_from(&[
            ("STORE_BACKEND", "memory"),
            ("LOCK_LEASE_SECONDS", "soon"),
        ]))
        .is_err());
    }

    #[test]
    fn test_promotion_pieces_are_normalized() {
        let config = Config::from_lookup(lookup_from(&[
            ("STORE_BACKEND", "memory"),
            ("PROMOTION_PIECES", "QqN"),
        ]))
        .unwrap();
        assert_eq!(config.promotion_pieces, vec!['q', 'n']);

        assert!(Config::from_lookup(lookup_from(&[
            ("STORE_BACKEND", "memory"),
            ("PROMOTION_PIECES", "qk"),
        ]))
        .is_err());
    }
}
