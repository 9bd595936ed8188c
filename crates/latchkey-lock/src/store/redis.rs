//! Redis-backed lock store
//!
//! `SET NX PX` for acquisition, Lua scripts for compare-and-delete and
//! compare-and-extend. A single multiplexed connection manager is shared by
//! every operation; it is cheap to clone and needs no client-side locking.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use latchkey_common::{DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_OP_TIMEOUT_MS, DEFAULT_REDIS_PORT};
use redis::aio::ConnectionManager;
use redis::{RedisResult, Script};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};
use url::Url;

use super::scripts::{COMPARE_AND_DELETE, COMPARE_AND_EXTEND};
use super::{LockStore, ttl_millis};
use crate::error::{LockError, Result};

/// Connection settings for the Redis lock store
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Full connection URL; when set, host/port/db/credentials are ignored
    #[serde(default)]
    pub url: Option<String>,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub db: i64,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    /// Timeout for establishing the connection (default: 5000ms)
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Bound on every single store round-trip (default: 3000ms)
    #[serde(default = "default_op_timeout_ms")]
    pub op_timeout_ms: u64,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    DEFAULT_REDIS_PORT
}

fn default_connect_timeout_ms() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_MS
}

fn default_op_timeout_ms() -> u64 {
    DEFAULT_OP_TIMEOUT_MS
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: None,
            host: default_host(),
            port: DEFAULT_REDIS_PORT,
            db: 0,
            username: None,
            password: None,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            op_timeout_ms: DEFAULT_OP_TIMEOUT_MS,
        }
    }
}

impl RedisConfig {
    /// Config pointing at a full `redis://` URL
    pub fn from_url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Default::default()
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn op_timeout(&self) -> Duration {
        Duration::from_millis(self.op_timeout_ms)
    }

    /// Connection URL with credentials percent-encoded
    pub fn connection_url(&self) -> Result<String> {
        if let Some(url) = &self.url {
            return Ok(url.clone());
        }

        let mut url = Url::parse(&format!("redis://{}:{}/{}", self.host, self.port, self.db))
            .map_err(|e| LockError::InvalidArgument(format!("invalid redis address: {}", e)))?;

        if let Some(username) = &self.username {
            url.set_username(username).map_err(|_| {
                LockError::InvalidArgument("redis username cannot be set".to_string())
            })?;
        }
        if let Some(password) = &self.password {
            url.set_password(Some(password)).map_err(|_| {
                LockError::InvalidArgument("redis password cannot be set".to_string())
            })?;
        }

        Ok(url.to_string())
    }

    /// Address safe for logs (no credentials)
    pub fn display_addr(&self) -> String {
        match &self.url {
            Some(raw) => match Url::parse(raw) {
                Ok(url) => format!(
                    "{}:{}{}",
                    url.host_str().unwrap_or("?"),
                    url.port().unwrap_or(DEFAULT_REDIS_PORT),
                    url.path()
                ),
                Err(_) => "<invalid url>".to_string(),
            },
            None => format!("{}:{}/{}", self.host, self.port, self.db),
        }
    }
}

/// Lock store on a Redis server
#[derive(Clone)]
pub struct RedisLockStore {
    conn: ConnectionManager,
    op_timeout: Duration,
    release_script: Script,
    extend_script: Script,
}

impl RedisLockStore {
    /// Connect to Redis and verify the connection with a `PING`
    pub async fn connect(config: &RedisConfig) -> Result<Self> {
        let addr = config.display_addr();
        let client = redis::Client::open(config.connection_url()?.as_str())?;

        let conn = tokio::time::timeout(config.connect_timeout(), ConnectionManager::new(client))
            .await
            .map_err(|_| {
                LockError::StoreUnavailable(format!(
                    "timed out connecting to redis at {} after {:?}",
                    addr,
                    config.connect_timeout()
                ))
            })??;

        let store = Self::from_connection(conn, config.op_timeout());
        match store.ping().await {
            Ok(()) => {
                info!(addr = %addr, "Redis lock store connected");
                Ok(store)
            }
            Err(e) => {
                error!(addr = %addr, error = %e, "Redis lock store ping failed");
                Err(e)
            }
        }
    }

    /// Wrap an existing connection manager
    pub fn from_connection(conn: ConnectionManager, op_timeout: Duration) -> Self {
        Self {
            conn,
            op_timeout,
            release_script: Script::new(COMPARE_AND_DELETE),
            extend_script: Script::new(COMPARE_AND_EXTEND),
        }
    }

    /// Run one store command under the operation timeout
    async fn run<T, F>(&self, op: &'static str, fut: F) -> Result<T>
    where
        F: Future<Output = RedisResult<T>>,
    {
        match tokio::time::timeout(self.op_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                debug!(op, error = %e, "Redis command failed");
                Err(e.into())
            }
            Err(_) => Err(LockError::StoreUnavailable(format!(
                "{} timed out after {:?}",
                op, self.op_timeout
            ))),
        }
    }
}

#[async_trait]
impl LockStore for RedisLockStore {
    async fn try_set(&self, key: &str, token: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn.clone();
        let reply: Option<String> = self
            .run("SET NX PX", async move {
                redis::cmd("SET")
                    .arg(key)
                    .arg(token)
                    .arg("NX")
                    .arg("PX")
                    .arg(ttl_millis(ttl))
                    .query_async(&mut conn)
                    .await
            })
            .await?;
        Ok(reply.is_some())
    }

    async fn compare_and_delete(&self, key: &str, token: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let deleted: i64 = self
            .run("compare-and-delete", async move {
                self.release_script
                    .key(key)
                    .arg(token)
                    .invoke_async(&mut conn)
                    .await
            })
            .await?;
        Ok(deleted == 1)
    }

    async fn compare_and_extend(&self, key: &str, token: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn.clone();
        let extended: i64 = self
            .run("compare-and-extend", async move {
                self.extend_script
                    .key(key)
                    .arg(token)
                    .arg(ttl_millis(ttl))
                    .invoke_async(&mut conn)
                    .await
            })
            .await?;
        Ok(extended == 1)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let count: i64 = self
            .run("EXISTS", async move {
                redis::cmd("EXISTS").arg(key).query_async(&mut conn).await
            })
            .await?;
        Ok(count > 0)
    }

    async fn remaining_ttl(&self, key: &str) -> Result<Option<Duration>> {
        let mut conn = self.conn.clone();
        let millis: i64 = self
            .run("PTTL", async move {
                redis::cmd("PTTL").arg(key).query_async(&mut conn).await
            })
            .await?;
        // -2: no such key, -1: key without expiry
        Ok((millis >= 0).then(|| Duration::from_millis(millis as u64)))
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: String = self
            .run("PING", async move {
                redis::cmd("PING").query_async(&mut conn).await
            })
            .await?;
        Ok(())
    }
}
