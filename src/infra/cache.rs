//! Cache-store client bound to one endpoint and logical database.

use redis::{Client, aio::MultiplexedConnection};
use tracing::info;
use url::Url;

use crate::config::RedisSettings;
use crate::util::redact;

use super::error::InfraError;

/// A verified cache connection. Cloning shares the underlying multiplexed connection.
#[derive(Clone)]
pub struct CacheClient {
    client: Client,
    connection: MultiplexedConnection,
    addr: String,
    db: i64,
}

impl std::fmt::Debug for CacheClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheClient")
            .field("addr", &self.addr)
            .field("db", &self.db)
            .finish_non_exhaustive()
    }
}

impl CacheClient {
    /// Build an unconnected client for `settings`.
    pub fn client(settings: &RedisSettings) -> Result<Client, InfraError> {
        let url = connection_url(settings)?;
        Client::open(url.as_str())
            .map_err(|err| InfraError::cache(format!("invalid cache endpoint: {err}")))
    }

    /// Connect and confirm the server answers `PING` before handing the client out.
    pub async fn connect(settings: &RedisSettings) -> Result<Self, InfraError> {
        let client = Self::client(settings)?;
        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|err| {
                InfraError::cache(format!("failed to connect to {}: {err}", settings.addr))
            })?;

        let cache = Self {
            client,
            connection,
            addr: settings.addr.clone(),
            db: settings.db,
        };
        cache.ping().await?;
        Ok(cache)
    }

    pub async fn ping(&self) -> Result<(), InfraError> {
        let mut connection = self.connection.clone();
        let reply: String = redis::cmd("PING")
            .query_async(&mut connection)
            .await
            .map_err(|err| InfraError::cache(format!("ping to {} failed: {err}", self.addr)))?;

        if reply != "PONG" {
            return Err(InfraError::cache(format!(
                "unexpected ping reply from {}: {reply}",
                self.addr
            )));
        }
        Ok(())
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn db(&self) -> i64 {
        self.db
    }

    pub fn inner(&self) -> &Client {
        &self.client
    }

    pub fn connection(&self) -> MultiplexedConnection {
        self.connection.clone()
    }
}

/// Connect to the cache store and verify it is alive.
pub async fn init(
    settings: &RedisSettings,
    reveal_credentials: bool,
) -> Result<CacheClient, InfraError> {
    let cache = CacheClient::connect(settings).await?;

    let password = settings
        .password
        .as_deref()
        .map(|password| redact::secret(password, reveal_credentials))
        .unwrap_or_default();
    info!(
        addr = %settings.addr,
        db = settings.db,
        password,
        "cache connection established"
    );

    Ok(cache)
}

fn connection_url(settings: &RedisSettings) -> Result<Url, InfraError> {
    let mut url =
        Url::parse(&format!("redis://{}/{}", settings.addr, settings.db)).map_err(|err| {
            InfraError::cache(format!("invalid cache address `{}`: {err}", settings.addr))
        })?;

    if let Some(password) = settings.password.as_deref() {
        url.set_password(Some(password))
            .map_err(|()| InfraError::cache("cache address cannot carry a password"))?;
    }

    Ok(url)
}
