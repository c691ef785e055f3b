//! Client configuration.

use std::time::Duration;

use mongo_driver_pool::{PoolConfig, ServerAddress};

use crate::error::Error;

/// Default server selection timeout.
pub const DEFAULT_SERVER_SELECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Default latency window for server selection.
pub const DEFAULT_LOCAL_THRESHOLD: Duration = Duration::from_millis(15);

/// Default maximum connections per server.
pub const DEFAULT_MAX_POOL_SIZE: u64 = 100;

/// Client configuration.
///
/// This struct is marked `#[non_exhaustive]` to allow adding new fields
/// in future releases without breaking semver. Use [`ClientConfig::default()`]
/// or [`ClientConfig::from_connection_string()`] to construct instances.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct ClientConfig {
    /// Seed servers.
    pub hosts: Vec<ServerAddress>,

    /// Default database from the connection string path.
    pub database: Option<String>,

    /// Application name sent in the handshake.
    pub app_name: Option<String>,

    /// Client-level operation timeout (`timeoutMS`). Zero means unlimited.
    pub timeout: Option<Duration>,

    /// How long server selection may wait for a suitable server. Zero
    /// disables the bound.
    pub server_selection_timeout: Duration,

    /// Latency window above the fastest eligible server.
    pub local_threshold: Duration,

    /// Maximum connections per server. Zero means unlimited.
    pub max_pool_size: u64,

    /// Upper bound on time spent waiting for a pooled connection.
    pub wait_queue_timeout: Option<Duration>,

    /// Idle connections older than this are closed instead of reused.
    pub max_idle_time: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            hosts: vec![ServerAddress::new("localhost", mongo_driver_pool::DEFAULT_PORT)],
            database: None,
            app_name: None,
            timeout: None,
            server_selection_timeout: DEFAULT_SERVER_SELECTION_TIMEOUT,
            local_threshold: DEFAULT_LOCAL_THRESHOLD,
            max_pool_size: DEFAULT_MAX_POOL_SIZE,
            wait_queue_timeout: None,
            max_idle_time: None,
        }
    }
}

fn parse_ms(key: &str, value: &str) -> Result<i64, Error> {
    value
        .parse::<i64>()
        .map_err(|_| Error::Config(format!("invalid {key}: {value}")))
}

fn parse_non_negative_ms(key: &str, value: &str) -> Result<Duration, Error> {
    let ms = parse_ms(key, value)?;
    let ms = u64::try_from(ms)
        .map_err(|_| Error::Config(format!("{key} must be non-negative: {value}")))?;
    Ok(Duration::from_millis(ms))
}

fn non_zero(duration: Duration) -> Option<Duration> {
    (!duration.is_zero()).then_some(duration)
}

impl ClientConfig {
    /// Create a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a MongoDB connection string.
    ///
    /// ```text
    /// mongodb://host1:27017,host2/app?timeoutMS=500&maxPoolSize=20
    /// ```
    ///
    /// Option keys are case-insensitive. Credentials are accepted and
    /// ignored. Unknown options are logged and skipped.
    pub fn from_connection_string(conn_str: &str) -> Result<Self, Error> {
        let rest = conn_str
            .strip_prefix("mongodb://")
            .ok_or_else(|| Error::Config("connection string must start with mongodb://".into()))?;

        let (authority, tail) = match rest.find(['/', '?']) {
            Some(i) => rest.split_at(i),
            None => (rest, ""),
        };
        let hosts_part = match authority.rsplit_once('@') {
            Some((_, hosts)) => {
                tracing::debug!("ignoring credentials in connection string");
                hosts
            }
            None => authority,
        };

        let hosts = hosts_part
            .split(',')
            .map(|h| ServerAddress::parse(h).map_err(|e| Error::Config(e.to_string())))
            .collect::<Result<_, _>>()?;
        let mut config = Self {
            hosts,
            ..Self::default()
        };

        let (path, query) = match tail.split_once('?') {
            Some((path, query)) => (path, query),
            None => (tail, ""),
        };
        let database = path.trim_start_matches('/');
        if !database.is_empty() {
            config.database = Some(database.to_string());
        }

        for part in query.split('&') {
            if part.is_empty() {
                continue;
            }
            let (key, value) = part
                .split_once('=')
                .ok_or_else(|| Error::Config(format!("invalid key-value: {part}")))?;
            let key = key.to_ascii_lowercase();

            match key.as_str() {
                "timeoutms" => {
                    config.timeout = Some(parse_non_negative_ms("timeoutMS", value)?);
                }
                "serverselectiontimeoutms" => {
                    // Negative values disable the bound.
                    let ms = parse_ms("serverSelectionTimeoutMS", value)?;
                    config.server_selection_timeout =
                        Duration::from_millis(u64::try_from(ms).unwrap_or(0));
                }
                "localthresholdms" => {
                    config.local_threshold = parse_non_negative_ms("localThresholdMS", value)?;
                }
                "maxpoolsize" => {
                    config.max_pool_size = value
                        .parse()
                        .map_err(|_| Error::Config(format!("invalid maxPoolSize: {value}")))?;
                }
                "waitqueuetimeoutms" => {
                    config.wait_queue_timeout =
                        non_zero(parse_non_negative_ms("waitQueueTimeoutMS", value)?);
                }
                "maxidletimems" => {
                    config.max_idle_time = non_zero(parse_non_negative_ms("maxIdleTimeMS", value)?);
                }
                "appname" => {
                    config.app_name = Some(value.to_string());
                }
                _ => {
                    tracing::debug!(
                        key = key,
                        value = value,
                        "ignoring unknown connection string option"
                    );
                }
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for values no client can run with.
    pub fn validate(&self) -> Result<(), Error> {
        if self.hosts.is_empty() {
            return Err(Error::Config("at least one host is required".into()));
        }
        if self.app_name.as_ref().is_some_and(|name| name.len() > 128) {
            return Err(Error::Config("appName must be at most 128 bytes".into()));
        }
        self.pool_config().validate()?;
        Ok(())
    }

    /// Derive the per-server pool configuration.
    #[must_use]
    pub fn pool_config(&self) -> PoolConfig {
        let mut pool = PoolConfig::new().max_pool_size(self.max_pool_size);
        if let Some(wait) = self.wait_queue_timeout {
            pool = pool.wait_queue_timeout(wait);
        }
        if let Some(idle) = self.max_idle_time {
            pool = pool.max_idle_time(idle);
        }
        pool
    }

    /// Replace the seed hosts.
    #[must_use]
    pub fn hosts(mut self, hosts: impl IntoIterator<Item = ServerAddress>) -> Self {
        self.hosts = hosts.into_iter().collect();
        self
    }

    /// Set the application name.
    #[must_use]
    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = Some(name.into());
        self
    }

    /// Set the client-level operation timeout.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the server selection timeout.
    #[must_use]
    pub fn server_selection_timeout(mut self, timeout: Duration) -> Self {
        self.server_selection_timeout = timeout;
        self
    }

    /// Set the latency window.
    #[must_use]
    pub fn local_threshold(mut self, threshold: Duration) -> Self {
        self.local_threshold = threshold;
        self
    }

    /// Set the maximum connections per server.
    #[must_use]
    pub fn max_pool_size(mut self, size: u64) -> Self {
        self.max_pool_size = size;
        self
    }

    /// Set the wait-queue timeout.
    #[must_use]
    pub fn wait_queue_timeout(mut self, timeout: Duration) -> Self {
        self.wait_queue_timeout = Some(timeout);
        self
    }

    /// Set the maximum idle time.
    #[must_use]
    pub fn max_idle_time(mut self, idle: Duration) -> Self {
        self.max_idle_time = Some(idle);
        self
    }
}
