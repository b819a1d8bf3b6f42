//! Postgres-backed document store
//!
//! Collections are tables of shape `(id TEXT PRIMARY KEY, doc JSONB NOT
//! NULL)`, reached through a deadpool pool. Endpoints that demand TLS (e.g.
//! managed Postgres with `sslmode=require`) get a rustls connector built
//! from the native certificate store.

use async_trait::async_trait;
use deadpool_postgres::{ManagerConfig, Pool, RecyclingMethod, Runtime};
use std::collections::HashSet;
use tokio_postgres::NoTls;
use tracing::{debug, info};

use crate::config::StoreConfig;
use crate::error::{SweepError, SweepResult};
use crate::reference::valid_collection_name;
use crate::store::{Document, DocumentStore};

pub struct PostgresStore {
    pool: Pool,
}

impl PostgresStore {
    /// Build a pool from the resolved configuration and verify it with a
    /// probe query before handing the store to a sweep.
    pub async fn connect(config: &StoreConfig) -> SweepResult<Self> {
        let mut cfg = deadpool_postgres::Config::new();
        cfg.host = Some(config.host.clone());
        cfg.port = Some(config.port);
        cfg.user = Some(config.user.clone());
        cfg.password = Some(config.password.clone());
        cfg.dbname = Some(config.database.clone());
        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });
        cfg.pool = Some(deadpool_postgres::PoolConfig::new(config.max_pool_size));

        let pool = if config.require_tls {
            let certs = rustls_native_certs::load_native_certs();
            let mut root_store = rustls::RootCertStore::empty();
            for cert in certs.certs {
                root_store.add(cert).ok();
            }

            let tls_config = rustls::ClientConfig::builder()
                .with_root_certificates(root_store)
                .with_no_client_auth();

            let tls = tokio_postgres_rustls::MakeRustlsConnect::new(tls_config);

            cfg.create_pool(Some(Runtime::Tokio1), tls)
                .map_err(|e| SweepError::Connection(format!("failed to create TLS pool: {}", e)))?
        } else {
            cfg.create_pool(Some(Runtime::Tokio1), NoTls)
                .map_err(|e| SweepError::Connection(format!("failed to create pool: {}", e)))?
        };

        // Probe before any sweep stage runs so authentication failures
        // surface as connection errors, not read errors.
        let client = pool
            .get()
            .await
            .map_err(|e| SweepError::Connection(format!("failed to get pool connection: {}", e)))?;
        client
            .query_one("SELECT 1 as ok", &[])
            .await
            .map_err(|e| SweepError::Connection(format!("connection probe failed: {}", e)))?;

        info!("Store connection verified (TLS: {})", config.require_tls);
        Ok(Self { pool })
    }

    /// Quote a collection name for interpolation as a table identifier.
    /// Names outside the strict identifier alphabet are refused outright.
    fn quoted(collection: &str) -> SweepResult<String> {
        if !valid_collection_name(collection) {
            return Err(SweepError::Read {
                collection: collection.to_string(),
                detail: "collection name is not a valid identifier".to_string(),
            });
        }
        Ok(format!("\"{}\"", collection))
    }

    async fn client(&self) -> SweepResult<deadpool_postgres::Client> {
        self.pool
            .get()
            .await
            .map_err(|e| SweepError::Connection(format!("pool exhausted: {}", e)))
    }
}

#[async_trait]
impl DocumentStore for PostgresStore {
    async fn scan(&self, collection: &str) -> SweepResult<Vec<Document>> {
        let table = Self::quoted(collection)?;
        let client = self.client().await?;

        let rows = client
            .query(format!("SELECT doc FROM {}", table).as_str(), &[])
            .await
            .map_err(|e| SweepError::Read {
                collection: collection.to_string(),
                detail: e.to_string(),
            })?;

        debug!(collection, rows = rows.len(), "scanned collection");
        Ok(rows.iter().map(|row| row.get::<_, Document>(0)).collect())
    }

    async fn ids(&self, collection: &str) -> SweepResult<HashSet<String>> {
        let table = Self::quoted(collection)?;
        let client = self.client().await?;

        let rows = client
            .query(format!("SELECT id FROM {}", table).as_str(), &[])
            .await
            .map_err(|e| SweepError::Read {
                collection: collection.to_string(),
                detail: e.to_string(),
            })?;

        Ok(rows.iter().map(|row| row.get::<_, String>(0)).collect())
    }

    async fn delete(&self, collection: &str, id: &str) -> SweepResult<()> {
        let table = Self::quoted(collection)?;
        let client = self.client().await?;

        client
            .execute(format!("DELETE FROM {} WHERE id = $1", table).as_str(), &[&id])
            .await
            .map_err(|e| SweepError::Delete {
                collection: collection.to_string(),
                id: id.to_string(),
                detail: e.to_string(),
            })?;
        Ok(())
    }
}
