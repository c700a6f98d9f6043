//! Application configuration loaded from environment variables.

use std::fmt;
use std::time::Duration;

use argon2::password_hash::PasswordHash;
use domain::Money;
use payments::DispatcherConfig;
use ratelimit::{BucketConfig, PolicyClass, RateLimitPolicy};
use thiserror::Error;

/// Errors raised while reading the configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("Invalid value for {var}: {reason}")]
    Invalid { var: String, reason: String },
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// String that never shows up in `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(..)")
    }
}

/// Administrator login settings. Login is enabled only when all three are set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdminConfig {
    pub email: Option<String>,
    /// PHC-format argon2 hash of the administrator password.
    pub password_hash: Option<Secret>,
    /// Opaque bearer token handed out on login and accepted on admin routes.
    pub api_token: Option<Secret>,
}

/// Server configuration.
///
/// Reads from environment variables:
/// - `HOST`, `PORT`: bind address (default `0.0.0.0:3000`)
/// - `RUST_LOG`: tracing filter directive (default `info`)
/// - `LOG_FORMAT`: `pretty` or `json`
/// - `DATABASE_URL`: Postgres connection string; in-memory stores when unset
/// - `ASAAS_WEBHOOK_SECRET`: webhook signing secret (required)
/// - `LOCK_TIMEOUT_MS`, `TX_TIMEOUT_MS`: reservation lock and transaction bounds
/// - `DISPATCH_WORKERS`, `DISPATCH_QUEUE_CAPACITY`, `DISPATCH_ENQUEUE_TIMEOUT_MS`
/// - `LEDGER_RETENTION_SECS`, `MAINTENANCE_INTERVAL_SECS`, `RATE_LIMIT_IDLE_SECS`
/// - `BOOKING_DEPOSIT_CENTS`: amount charged per booking (default `5000`)
/// - `TRUST_PROXY_HEADERS`: key rate limits on `X-Forwarded-For`/`X-Real-IP`
/// - `ADMIN_EMAIL`, `ADMIN_PASSWORD_HASH` (argon2, PHC format), `ADMIN_API_TOKEN`
/// - `RATE_LIMIT_{ANONYMOUS,AUTHENTICATED,SENSITIVE,WEBHOOK}_{PER_MINUTE,BURST}`
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<Secret>,
    pub database_max_connections: u32,
    pub webhook_secret: Secret,
    pub lock_timeout: Duration,
    pub transaction_timeout: Duration,
    pub dispatcher: DispatcherConfig,
    pub ledger_retention: Duration,
    pub booking_deposit: Money,
    pub maintenance_interval: Duration,
    pub rate_limit_idle: Duration,
    pub trust_proxy_headers: bool,
    pub admin: AdminConfig,
    pub rate_limits: RateLimitPolicy,
}

impl Config {
    /// Loads configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(&lookup);
        let defaults = Self::with_secret("");

        let webhook_secret = env
            .string("ASAAS_WEBHOOK_SECRET")
            .ok_or(ConfigError::Missing("ASAAS_WEBHOOK_SECRET"))?;

        let dispatcher = DispatcherConfig {
            workers: env.parse("DISPATCH_WORKERS")?.unwrap_or(defaults.dispatcher.workers),
            queue_capacity: env
                .parse("DISPATCH_QUEUE_CAPACITY")?
                .unwrap_or(defaults.dispatcher.queue_capacity),
            enqueue_timeout: env
                .millis("DISPATCH_ENQUEUE_TIMEOUT_MS")?
                .unwrap_or(defaults.dispatcher.enqueue_timeout),
        };

        let admin = AdminConfig {
            email: env.string("ADMIN_EMAIL"),
            password_hash: env
                .string("ADMIN_PASSWORD_HASH")
                .map(|hash| parse_password_hash(&hash))
                .transpose()?,
            api_token: env.string("ADMIN_API_TOKEN").map(Secret::new),
        };

        let mut rate_limits = RateLimitPolicy::default();
        for class in PolicyClass::ALL {
            let prefix = format!("RATE_LIMIT_{}", class.as_str().to_ascii_uppercase());
            let current = rate_limits.config(class);
            let per_minute_var = format!("{prefix}_PER_MINUTE");
            let burst_var = format!("{prefix}_BURST");
            let per_minute = env.parse(&per_minute_var)?;
            let burst = env.parse(&burst_var)?;
            if per_minute.is_none() && burst.is_none() {
                continue;
            }
            let config = BucketConfig::per_minute(
                per_minute.unwrap_or(current.rate_per_minute()),
                burst.unwrap_or(current.burst()),
            )
            .map_err(|e| ConfigError::Invalid {
                var: prefix.clone(),
                reason: e.to_string(),
            })?;
            rate_limits = rate_limits.with(class, config);
        }

        Ok(Self {
            host: env.string("HOST").unwrap_or(defaults.host),
            port: env.parse("PORT")?.unwrap_or(defaults.port),
            log_level: env.string("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: match env.string("LOG_FORMAT").as_deref() {
                None => defaults.log_format,
                Some(f) if f.eq_ignore_ascii_case("json") => LogFormat::Json,
                Some(f) if f.eq_ignore_ascii_case("pretty") => LogFormat::Pretty,
                Some(other) => {
                    return Err(ConfigError::Invalid {
                        var: "LOG_FORMAT".to_string(),
                        reason: format!("expected `pretty` or `json`, got `{other}`"),
                    });
                }
            },
            database_url: env.string("DATABASE_URL").map(Secret::new),
            database_max_connections: env
                .parse("DATABASE_MAX_CONNECTIONS")?
                .unwrap_or(defaults.database_max_connections),
            webhook_secret: Secret::new(webhook_secret),
            lock_timeout: env
                .millis("LOCK_TIMEOUT_MS")?
                .unwrap_or(defaults.lock_timeout),
            transaction_timeout: env
                .millis("TX_TIMEOUT_MS")?
                .unwrap_or(defaults.transaction_timeout),
            dispatcher,
            ledger_retention: env
                .secs("LEDGER_RETENTION_SECS")?
                .unwrap_or(defaults.ledger_retention),
            booking_deposit: match env.parse::<i64>("BOOKING_DEPOSIT_CENTS")? {
                None => defaults.booking_deposit,
                Some(cents) if cents >= 0 => Money::from_cents(cents),
                Some(cents) => {
                    return Err(ConfigError::Invalid {
                        var: "BOOKING_DEPOSIT_CENTS".to_string(),
                        reason: format!("must not be negative, got {cents}"),
                    });
                }
            },
            maintenance_interval: env
                .secs("MAINTENANCE_INTERVAL_SECS")?
                .unwrap_or(defaults.maintenance_interval),
            rate_limit_idle: env
                .secs("RATE_LIMIT_IDLE_SECS")?
                .unwrap_or(defaults.rate_limit_idle),
            trust_proxy_headers: env
                .flag("TRUST_PROXY_HEADERS")?
                .unwrap_or(defaults.trust_proxy_headers),
            admin,
            rate_limits,
        })
    }

    /// Default configuration around the given webhook secret.
    pub fn with_secret(secret: impl Into<String>) -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            database_url: None,
            database_max_connections: 10,
            webhook_secret: Secret::new(secret),
            lock_timeout: store::DEFAULT_LOCK_TIMEOUT,
            transaction_timeout: payments::DEFAULT_TRANSACTION_TIMEOUT,
            dispatcher: DispatcherConfig::default(),
            ledger_retention: store::DEFAULT_RETENTION,
            booking_deposit: Money::from_cents(5000),
            maintenance_interval: Duration::from_secs(300),
            rate_limit_idle: Duration::from_secs(600),
            trust_proxy_headers: false,
            admin: AdminConfig::default(),
            rate_limits: RateLimitPolicy::default(),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

struct Env<'a, F>(&'a F);

impl<F> Env<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, var: &str) -> Option<String> {
        (self.0)(var)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T>(&self, var: &str) -> Result<Option<T>, ConfigError>
    where
        T: std::str::FromStr,
        T::Err: fmt::Display,
    {
        self.string(var)
            .map(|raw| {
                raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
                    var: var.to_string(),
                    reason: e.to_string(),
                })
            })
            .transpose()
    }

    fn millis(&self, var: &str) -> Result<Option<Duration>, ConfigError> {
        Ok(self.parse::<u64>(var)?.map(Duration::from_millis))
    }

    fn secs(&self, var: &str) -> Result<Option<Duration>, ConfigError> {
        Ok(self.parse::<u64>(var)?.map(Duration::from_secs))
    }

    fn flag(&self, var: &str) -> Result<Option<bool>, ConfigError> {
        match self.string(var).map(|v| v.to_ascii_lowercase()).as_deref() {
            None => Ok(None),
            Some("1" | "true" | "yes" | "on") => Ok(Some(true)),
            Some("0" | "false" | "no" | "off") => Ok(Some(false)),
            Some(other) => Err(ConfigError::Invalid {
                var: var.to_string(),
                reason: format!("expected a boolean, got `{other}`"),
            }),
        }
    }
}

fn parse_password_hash(hash: &str) -> Result<Secret, ConfigError> {
    let invalid = |reason: String| ConfigError::Invalid {
        var: "ADMIN_PASSWORD_HASH".to_string(),
        reason,
    };
    let parsed = PasswordHash::new(hash).map_err(|e| invalid(e.to_string()))?;
    if !parsed.algorithm.as_str().starts_with("argon2") {
        return Err(invalid(format!(
            "expected an argon2 hash, got `{}`",
            parsed.algorithm
        )));
    }
    Ok(Secret::new(hash))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn webhook_secret_is_required() {
        assert_eq!(
            load(&[]).unwrap_err(),
            ConfigError::Missing("ASAAS_WEBHOOK_SECRET")
        );
        assert_eq!(
            load(&[("ASAAS_WEBHOOK_SECRET", "   ")]).unwrap_err(),
            ConfigError::Missing("ASAAS_WEBHOOK_SECRET")
        );
    }

    #[test]
    fn test_default_values() {
        let config = load(&[("ASAAS_WEBHOOK_SECRET", "whsec")]).unwrap();
        assert_eq!(config.addr(), "0.0.0.0:3000");
        assert_eq!(config.webhook_secret.expose(), "whsec");
        assert_eq!(config.lock_timeout, Duration::from_secs(5));
        assert_eq!(config.transaction_timeout, Duration::from_secs(10));
        assert_eq!(config.ledger_retention, Duration::from_secs(7 * 24 * 3600));
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert!(config.database_url.is_none());
        assert!(!config.trust_proxy_headers);
        assert_eq!(config.rate_limits, RateLimitPolicy::default());
        assert_eq!(config.booking_deposit, Money::from_cents(5000));
    }

    #[test]
    fn overrides_are_applied() {
        let config = load(&[
            ("ASAAS_WEBHOOK_SECRET", "whsec"),
            ("PORT", "8080"),
            ("LOG_FORMAT", "JSON"),
            ("LOCK_TIMEOUT_MS", "250"),
            ("DISPATCH_WORKERS", "8"),
            ("TRUST_PROXY_HEADERS", "true"),
            ("BOOKING_DEPOSIT_CENTS", "7500"),
            ("RATE_LIMIT_WEBHOOK_PER_MINUTE", "600"),
            ("RATE_LIMIT_SENSITIVE_BURST", "3"),
        ])
        .unwrap();

        assert_eq!(config.port, 8080);
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.lock_timeout, Duration::from_millis(250));
        assert_eq!(config.dispatcher.workers, 8);
        assert!(config.trust_proxy_headers);
        assert_eq!(config.booking_deposit, Money::from_cents(7500));

        let webhook = config.rate_limits.config(PolicyClass::Webhook);
        assert_eq!(webhook.rate_per_minute(), 600);
        assert_eq!(webhook.burst(), 50);
        let sensitive = config.rate_limits.config(PolicyClass::Sensitive);
        assert_eq!(sensitive.rate_per_minute(), 5);
        assert_eq!(sensitive.burst(), 3);
    }

    #[test]
    fn rejects_malformed_values() {
        let err = load(&[("ASAAS_WEBHOOK_SECRET", "whsec"), ("PORT", "eighty")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var, .. } if var == "PORT"));

        let err = load(&[
            ("ASAAS_WEBHOOK_SECRET", "whsec"),
            ("RATE_LIMIT_ANONYMOUS_BURST", "0"),
        ])
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var, .. } if var == "RATE_LIMIT_ANONYMOUS"));

        for hash in ["abcd", "$2b$12$R9h/cIPz0gi.URNNX3kh2OPST9/PgBkqquzi.Ss7KIUgO2t0jWMUW"] {
            let err = load(&[
                ("ASAAS_WEBHOOK_SECRET", "whsec"),
                ("ADMIN_PASSWORD_HASH", hash),
            ])
            .unwrap_err();
            assert!(matches!(err, ConfigError::Invalid { var, .. } if var == "ADMIN_PASSWORD_HASH"));
        }
    }

    #[test]
    fn accepts_argon2_password_hash() {
        let hash = "$argon2id$v=19$m=1024,t=1,p=1$dGVzdC1zYWx0LWJ5dGVz$sv0XbP4J4sVdcD3sXM9ZkSkqjGaHyX3EZZYW0oNhCxY";
        let config = load(&[
            ("ASAAS_WEBHOOK_SECRET", "whsec"),
            ("ADMIN_PASSWORD_HASH", hash),
        ])
        .unwrap();
        assert_eq!(config.admin.password_hash.unwrap().expose(), hash);
    }

    #[test]
    fn secrets_are_redacted() {
        let config = load(&[
            ("ASAAS_WEBHOOK_SECRET", "whsec_do_not_print"),
            ("ADMIN_API_TOKEN", "token_do_not_print"),
        ])
        .unwrap();
        let debug = format!("{config:?}");
        assert!(!debug.contains("do_not_print"));
    }
}
