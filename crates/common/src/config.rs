//! Environment-driven configuration.
//!
//! Every section is parsed through a lookup function so that binaries read the
//! process environment (after loading an optional `.env`) while tests supply a
//! plain map. Missing required variables and unparsable values surface as
//! [`AppError::Config`], which aborts startup.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::AppError;

/// Variable lookup used by every `from_lookup` constructor.
pub type Lookup<'a> = &'a dyn Fn(&str) -> Option<String>;

/// Load `.env` into the process environment if one exists.
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn process_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

fn lookup_non_empty(lookup: Lookup<'_>, key: &str) -> Option<String> {
    lookup(key).filter(|v| !v.trim().is_empty())
}

fn required(lookup: Lookup<'_>, key: &str) -> Result<String, AppError> {
    lookup_non_empty(lookup, key)
        .ok_or_else(|| AppError::Config(format!("{key} environment variable is required")))
}

fn string_or(lookup: Lookup<'_>, key: &str, default: &str) -> String {
    lookup_non_empty(lookup, key).unwrap_or_else(|| default.to_string())
}

fn parse_or<T: FromStr>(lookup: Lookup<'_>, key: &str, default: T) -> Result<T, AppError> {
    match lookup_non_empty(lookup, key) {
        Some(raw) => raw.trim().parse().map_err(|_| {
            AppError::Config(format!(
                "{key} must be a valid {}",
                std::any::type_name::<T>()
            ))
        }),
        None => Ok(default),
    }
}

fn flag_or(lookup: Lookup<'_>, key: &str, default: bool) -> Result<bool, AppError> {
    match lookup_non_empty(lookup, key) {
        Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(AppError::Config(format!("{key} must be a boolean"))),
        },
        None => Ok(default),
    }
}

/// PostgreSQL settings for the digest repositories.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// PostgreSQL connection string
    pub url: String,
    /// Maximum number of pooled connections (default: 20)
    pub max_connections: u32,
}

impl DatabaseConfig {
    pub fn from_lookup(lookup: Lookup<'_>) -> Result<Self, AppError> {
        Ok(Self {
            url: required(lookup, "DATABASE_URL")?,
            max_connections: parse_or(lookup, "DB_MAX_CONNECTIONS", 20)?,
        })
    }
}

/// Broker settings shared by the publishing and consuming sides.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Redis connection string
    pub redis_url: String,
    /// Logical topic; partition streams are named `{topic}:{n}`
    pub topic: String,
    /// Consumer group shared by all delivery workers
    pub group_id: String,
    /// This process's consumer name inside the group
    pub consumer_name: String,
    /// Number of partition streams
    pub partitions: u32,
    /// Partitions this consumer reads (default: all)
    pub assigned_partitions: Vec<u32>,
    /// How long the publisher waits to fill a batch
    pub linger: Duration,
    /// Maximum publishes written in one round trip
    pub batch_size: usize,
    /// Upper bound on a single publish call
    pub write_timeout: Duration,
    /// Longest a fetch blocks before re-checking for cancellation
    pub max_wait: Duration,
    /// Entries requested per read
    pub fetch_count: usize,
    /// Entries left unacknowledged by any consumer for this long are claimed
    /// by the next consumer that looks
    pub claim_idle: Duration,
    /// Approximate retention per partition stream
    pub stream_maxlen: usize,
}

impl BrokerConfig {
    pub fn from_lookup(lookup: Lookup<'_>) -> Result<Self, AppError> {
        let partitions: u32 = parse_or(lookup, "BROKER_PARTITIONS", 4)?;
        if partitions == 0 {
            return Err(AppError::Config(
                "BROKER_PARTITIONS must be at least 1".to_string(),
            ));
        }

        let assigned_partitions = match lookup_non_empty(lookup, "BROKER_ASSIGNED_PARTITIONS") {
            Some(raw) => parse_partition_list(&raw, partitions)?,
            None => (0..partitions).collect(),
        };

        let batch_size: usize = parse_or(lookup, "BROKER_BATCH_SIZE", 100)?;
        let fetch_count: usize = parse_or(lookup, "BROKER_FETCH_COUNT", 10)?;
        if batch_size == 0 || fetch_count == 0 {
            return Err(AppError::Config(
                "BROKER_BATCH_SIZE and BROKER_FETCH_COUNT must be at least 1".to_string(),
            ));
        }

        let max_wait = Duration::from_millis(parse_or(lookup, "BROKER_MAX_WAIT_MS", 1_000)?);
        let claim_idle = Duration::from_millis(parse_or(lookup, "BROKER_CLAIM_IDLE_MS", 300_000)?);
        // BLOCK 0 would mean "wait forever" to Redis
        if max_wait.is_zero() || claim_idle.is_zero() {
            return Err(AppError::Config(
                "BROKER_MAX_WAIT_MS and BROKER_CLAIM_IDLE_MS must be at least 1".to_string(),
            ));
        }

        let consumer_name = lookup_non_empty(lookup, "BROKER_CONSUMER_NAME")
            .or_else(|| lookup_non_empty(lookup, "HOSTNAME"))
            .unwrap_or_else(|| format!("notifier-{}", uuid::Uuid::new_v4().simple()));

        Ok(Self {
            redis_url: string_or(lookup, "REDIS_URL", "redis://localhost:6379"),
            topic: string_or(lookup, "BROKER_TOPIC_EMAIL_SENDING", "email.send"),
            group_id: string_or(lookup, "BROKER_GROUP_ID", "email-sender"),
            consumer_name,
            partitions,
            assigned_partitions,
            linger: Duration::from_millis(parse_or(lookup, "BROKER_LINGER_MS", 10)?),
            batch_size,
            write_timeout: Duration::from_millis(parse_or(
                lookup,
                "BROKER_WRITE_TIMEOUT_MS",
                10_000,
            )?),
            max_wait,
            fetch_count,
            claim_idle,
            stream_maxlen: parse_or(lookup, "BROKER_STREAM_MAXLEN", 100_000)?,
        })
    }

    /// Stream name backing one partition of the topic.
    pub fn stream_for(&self, partition: u32) -> String {
        format!("{}:{}", self.topic, partition)
    }

    /// Streams this consumer reads, in partition order.
    pub fn assigned_streams(&self) -> Vec<String> {
        self.assigned_partitions
            .iter()
            .map(|p| self.stream_for(*p))
            .collect()
    }
}

fn parse_partition_list(raw: &str, partitions: u32) -> Result<Vec<u32>, AppError> {
    let mut assigned = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let n: u32 = part.parse().map_err(|_| {
            AppError::Config(format!("BROKER_ASSIGNED_PARTITIONS: '{part}' is not a number"))
        })?;
        if n >= partitions {
            return Err(AppError::Config(format!(
                "BROKER_ASSIGNED_PARTITIONS: partition {n} out of range 0..{partitions}"
            )));
        }
        if !assigned.contains(&n) {
            assigned.push(n);
        }
    }
    if assigned.is_empty() {
        return Err(AppError::Config(
            "BROKER_ASSIGNED_PARTITIONS must name at least one partition".to_string(),
        ));
    }
    assigned.sort_unstable();
    Ok(assigned)
}

/// SMTP relay settings for the mail transport.
#[derive(Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    /// Envelope sender and `From` address
    pub from_email: String,
    /// Display name in the `From` header
    pub from_name: String,
    /// Socket timeout for every SMTP command
    pub timeout: Duration,
    /// Accept self-signed certificates during STARTTLS
    pub accept_invalid_certs: bool,
    /// Name announced in EHLO (default: lettre's local hostname detection)
    pub hello_name: Option<String>,
}

impl SmtpConfig {
    pub fn from_lookup(lookup: Lookup<'_>) -> Result<Self, AppError> {
        Ok(Self {
            host: string_or(lookup, "SMTP_HOST", "smtp.example.com"),
            port: parse_or(lookup, "SMTP_PORT", 587)?,
            user: required(lookup, "SMTP_USER")?,
            password: required(lookup, "SMTP_PASSWORD")?,
            from_email: required(lookup, "SMTP_FROM_EMAIL")?,
            from_name: string_or(lookup, "SMTP_FROM_NAME", "TaskTracker"),
            timeout: Duration::from_secs(parse_or(lookup, "SMTP_TIMEOUT_SECS", 30)?),
            accept_invalid_certs: flag_or(lookup, "SMTP_ACCEPT_INVALID_CERTS", false)?,
            hello_name: lookup_non_empty(lookup, "SMTP_HELO_NAME"),
        })
    }
}

impl fmt::Debug for SmtpConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("from_email", &self.from_email)
            .field("from_name", &self.from_name)
            .field("timeout", &self.timeout)
            .field("accept_invalid_certs", &self.accept_invalid_certs)
            .field("hello_name", &self.hello_name)
            .finish()
    }
}

/// Digest cycle settings.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Five-field cron expression, evaluated in UTC (default: midnight daily)
    pub cron: String,
    /// Look-back window for completed tasks, in hours (default: 24)
    pub window_hours: u32,
    /// Run one cycle immediately at startup
    pub run_on_start: bool,
}

impl SchedulerConfig {
    pub fn from_lookup(lookup: Lookup<'_>) -> Result<Self, AppError> {
        let window_hours: u32 = parse_or(lookup, "DIGEST_WINDOW_HOURS", 24)?;
        if window_hours == 0 {
            return Err(AppError::Config(
                "DIGEST_WINDOW_HOURS must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            cron: string_or(lookup, "DIGEST_CRON", "0 0 * * *"),
            window_hours,
            run_on_start: flag_or(lookup, "DIGEST_RUN_ON_START", false)?,
        })
    }

    pub fn window(&self) -> chrono::Duration {
        chrono::Duration::hours(i64::from(self.window_hours))
    }
}

/// Delivery worker loop settings.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Pause after a failed fetch before trying again
    pub fetch_retry: Duration,
}

impl WorkerConfig {
    pub fn from_lookup(lookup: Lookup<'_>) -> Result<Self, AppError> {
        Ok(Self {
            fetch_retry: Duration::from_millis(parse_or(lookup, "WORKER_FETCH_RETRY_MS", 1_000)?),
        })
    }
}

/// Configuration of the `tracker-scheduler` process.
#[derive(Debug, Clone)]
pub struct DigestServiceConfig {
    pub database: DatabaseConfig,
    pub broker: BrokerConfig,
    pub scheduler: SchedulerConfig,
}

impl DigestServiceConfig {
    /// Load configuration from `.env` and the process environment.
    pub fn from_env() -> Result<Self, AppError> {
        load_dotenv();
        Self::from_lookup(&process_env)
    }

    pub fn from_lookup(lookup: Lookup<'_>) -> Result<Self, AppError> {
        Ok(Self {
            database: DatabaseConfig::from_lookup(lookup)?,
            broker: BrokerConfig::from_lookup(lookup)?,
            scheduler: SchedulerConfig::from_lookup(lookup)?,
        })
    }
}

/// Configuration of the `tracker-notifier` process.
#[derive(Debug, Clone)]
pub struct NotifierServiceConfig {
    pub broker: BrokerConfig,
    pub smtp: SmtpConfig,
    pub worker: WorkerConfig,
}

impl NotifierServiceConfig {
    /// Load configuration from `.env` and the process environment.
    pub fn from_env() -> Result<Self, AppError> {
        load_dotenv();
        Self::from_lookup(&process_env)
    }

    pub fn from_lookup(lookup: Lookup<'_>) -> Result<Self, AppError> {
        Ok(Self {
            broker: BrokerConfig::from_lookup(lookup)?,
            smtp: SmtpConfig::from_lookup(lookup)?,
            worker: WorkerConfig::from_lookup(lookup)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn smtp_env() -> HashMap<String, String> {
        env(&[
            ("SMTP_USER", "mailer"),
            ("SMTP_PASSWORD", "hunter2"),
            ("SMTP_FROM_EMAIL", "noreply@example.com"),
        ])
    }

    #[test]
    fn test_broker_defaults() {
        let vars = env(&[("BROKER_CONSUMER_NAME", "worker-a")]);
        let cfg = BrokerConfig::from_lookup(&|k| vars.get(k).cloned()).unwrap();

        assert_eq!(cfg.redis_url, "redis://localhost:6379");
        assert_eq!(cfg.topic, "email.send");
        assert_eq!(cfg.group_id, "email-sender");
        assert_eq!(cfg.consumer_name, "worker-a");
        assert_eq!(cfg.partitions, 4);
        assert_eq!(cfg.assigned_partitions, vec![0, 1, 2, 3]);
        assert_eq!(cfg.linger, Duration::from_millis(10));
        assert_eq!(cfg.write_timeout, Duration::from_secs(10));
        assert_eq!(cfg.max_wait, Duration::from_secs(1));
        assert_eq!(cfg.claim_idle, Duration::from_secs(300));
        assert_eq!(cfg.stream_for(2), "email.send:2");
    }

    #[test]
    fn test_consumer_name_falls_back_to_hostname() {
        let vars = env(&[("HOSTNAME", "pod-7")]);
        let cfg = BrokerConfig::from_lookup(&|k| vars.get(k).cloned()).unwrap();
        assert_eq!(cfg.consumer_name, "pod-7");
    }

    #[test]
    fn test_assigned_partitions_parsed_and_sorted() {
        let vars = env(&[
            ("BROKER_PARTITIONS", "8"),
            ("BROKER_ASSIGNED_PARTITIONS", "5, 1,5"),
        ]);
        let cfg = BrokerConfig::from_lookup(&|k| vars.get(k).cloned()).unwrap();
        assert_eq!(cfg.assigned_partitions, vec![1, 5]);
        assert_eq!(cfg.assigned_streams(), vec!["email.send:1", "email.send:5"]);
    }

    #[test]
    fn test_assigned_partition_out_of_range_rejected() {
        let vars = env(&[
            ("BROKER_PARTITIONS", "2"),
            ("BROKER_ASSIGNED_PARTITIONS", "2"),
        ]);
        let err = BrokerConfig::from_lookup(&|k| vars.get(k).cloned()).unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }

    #[test]
    fn test_zero_partitions_rejected() {
        let vars = env(&[("BROKER_PARTITIONS", "0")]);
        assert!(BrokerConfig::from_lookup(&|k| vars.get(k).cloned()).is_err());
    }

    #[test]
    fn test_zero_max_wait_rejected() {
        let vars = env(&[("BROKER_MAX_WAIT_MS", "0"), ("BROKER_CONSUMER_NAME", "c")]);
        let err = BrokerConfig::from_lookup(&|k| vars.get(k).cloned()).unwrap_err();
        assert!(err.to_string().contains("BROKER_MAX_WAIT_MS"));

        let vars = env(&[("BROKER_CLAIM_IDLE_MS", "0"), ("BROKER_CONSUMER_NAME", "c")]);
        assert!(BrokerConfig::from_lookup(&|k| vars.get(k).cloned()).is_err());
    }

    #[test]
    fn test_smtp_requires_credentials() {
        let vars = env(&[("SMTP_USER", "mailer")]);
        let err = SmtpConfig::from_lookup(&|k| vars.get(k).cloned()).unwrap_err();
        assert!(err.to_string().contains("SMTP_PASSWORD"));
    }

    #[test]
    fn test_smtp_defaults_and_redacted_debug() {
        let vars = smtp_env();
        let cfg = SmtpConfig::from_lookup(&|k| vars.get(k).cloned()).unwrap();

        assert_eq!(cfg.host, "smtp.example.com");
        assert_eq!(cfg.port, 587);
        assert_eq!(cfg.from_name, "TaskTracker");
        assert!(!cfg.accept_invalid_certs);

        let debug = format!("{cfg:?}");
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn test_invalid_number_is_config_error() {
        let mut vars = smtp_env();
        vars.insert("SMTP_PORT".into(), "not-a-port".into());
        let err = SmtpConfig::from_lookup(&|k| vars.get(k).cloned()).unwrap_err();
        assert!(err.to_string().contains("SMTP_PORT"));
    }

    #[test]
    fn test_invalid_flag_is_config_error() {
        let mut vars = smtp_env();
        vars.insert("SMTP_ACCEPT_INVALID_CERTS".into(), "maybe".into());
        assert!(SmtpConfig::from_lookup(&|k| vars.get(k).cloned()).is_err());
    }

    #[test]
    fn test_scheduler_defaults() {
        let vars: HashMap<String, String> = HashMap::new();
        let cfg = SchedulerConfig::from_lookup(&|k| vars.get(k).cloned()).unwrap();
        assert_eq!(cfg.cron, "0 0 * * *");
        assert_eq!(cfg.window(), chrono::Duration::hours(24));
        assert!(!cfg.run_on_start);
    }

    #[test]
    fn test_digest_service_requires_database_url() {
        let vars: HashMap<String, String> = HashMap::new();
        let err = DigestServiceConfig::from_lookup(&|k| vars.get(k).cloned()).unwrap_err();
        assert!(err.to_string().contains("DATABASE_URL"));
    }

    #[test]
    fn test_notifier_service_config() {
        let mut vars = smtp_env();
        vars.insert("WORKER_FETCH_RETRY_MS".into(), "250".into());
        let cfg = NotifierServiceConfig::from_lookup(&|k| vars.get(k).cloned()).unwrap();
        assert_eq!(cfg.worker.fetch_retry, Duration::from_millis(250));
        assert_eq!(cfg.smtp.user, "mailer");
    }

    #[test]
    fn test_blank_values_use_defaults() {
        let vars = env(&[("REDIS_URL", "  "), ("BROKER_CONSUMER_NAME", "c")]);
        let cfg = BrokerConfig::from_lookup(&|k| vars.get(k).cloned()).unwrap();
        assert_eq!(cfg.redis_url, "redis://localhost:6379");
    }
}
