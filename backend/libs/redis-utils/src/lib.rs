use anyhow::{Context, Result};
use redis::aio::ConnectionManager;
use redis::{Client, ConnectionAddr, ConnectionInfo, RedisConnectionInfo, RedisError};
use std::fmt;
use tokio::sync::Mutex;
use tokio::time::{timeout, Duration};
use tracing::{info, warn};

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Connection settings for a single Redis node.
#[derive(Clone)]
pub struct RedisSettings {
    pub host: String,
    pub port: u16,
    pub db: i64,
    pub password: Option<String>,
}

impl RedisSettings {
    pub fn new(host: impl Into<String>, port: u16, db: i64, password: Option<String>) -> Self {
        Self {
            host: host.into(),
            port,
            db,
            // An empty password means "no AUTH".
            password: password.filter(|p| !p.is_empty()),
        }
    }

    pub fn connection_info(&self) -> ConnectionInfo {
        ConnectionInfo {
            addr: ConnectionAddr::Tcp(self.host.clone(), self.port),
            redis: RedisConnectionInfo {
                db: self.db,
                password: self.password.clone(),
                ..Default::default()
            },
        }
    }

    /// `host:port/db` label for logs; never includes the password.
    pub fn label(&self) -> String {
        format!("{}:{}/{}", self.host, self.port, self.db)
    }
}

impl fmt::Debug for RedisSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("db", &self.db)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

/// Redis connection pool that connects on first use.
///
/// Opening the pool performs no I/O. The first `manager()` call connects; if
/// that fails the error is returned and the next call tries again.
pub struct RedisPool {
    client: Client,
    label: String,
    connect_timeout: Duration,
    manager: Mutex<Option<ConnectionManager>>,
}

impl RedisPool {
    pub fn open(settings: &RedisSettings) -> Result<Self> {
        let client = Client::open(settings.connection_info())
            .context("failed to construct Redis client")?;

        Ok(Self {
            client,
            label: settings.label(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            manager: Mutex::new(None),
        })
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Returns a handle to the shared connection manager, connecting first if needed.
    pub async fn manager(&self) -> Result<ConnectionManager, RedisError> {
        let mut guard = self.manager.lock().await;
        if let Some(manager) = guard.as_ref() {
            return Ok(manager.clone());
        }

        let manager = match timeout(self.connect_timeout, ConnectionManager::new(self.client.clone()))
            .await
        {
            Ok(Ok(manager)) => manager,
            Ok(Err(err)) => {
                warn!("Failed to connect to Redis at {}: {}", self.label, err);
                return Err(err);
            }
            Err(_) => {
                warn!("Timed out connecting to Redis at {}", self.label);
                return Err(RedisError::from((
                    redis::ErrorKind::IoError,
                    "redis connect timed out",
                )));
            }
        };

        info!("Redis connection established at {}", self.label);
        *guard = Some(manager.clone());
        Ok(manager)
    }
}
