//! 数据库连接管理

use dwf_core::{DwfError, Result};
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::info;

/// 数据库连接池
#[derive(Clone)]
pub struct DatabasePool {
    pool: PgPool,
}

impl DatabasePool {
    /// 建立连接池
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(|e| DwfError::Database(e.to_string()))?;

        info!("Connected to database with {} max connections", max_connections);
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}
