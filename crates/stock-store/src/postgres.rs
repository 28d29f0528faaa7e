use async_trait::async_trait;
use common::ProductId;
use sqlx::PgPool;

use crate::Result;
use crate::authoritative::{AuthoritativeStore, UpdatePrecondition};

/// PostgreSQL-backed authoritative stock store.
///
/// Reads and updates the `products.stock` column. The conditional update is
/// a single `UPDATE ... WHERE stock >= $n RETURNING stock`, so the check and
/// the write are atomic under PostgreSQL's row locking.
#[derive(Clone)]
pub struct PostgresAuthoritativeStore {
    pool: PgPool,
}

impl PostgresAuthoritativeStore {
    /// Creates a new PostgreSQL authoritative store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl AuthoritativeStore for PostgresAuthoritativeStore {
    async fn read_quantity(&self, product_id: &ProductId) -> Result<Option<i64>> {
        let stock: Option<i64> = sqlx::query_scalar("SELECT stock FROM products WHERE id = $1")
            .bind(product_id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        Ok(stock)
    }

    async fn conditional_update(
        &self,
        product_id: &ProductId,
        delta: i64,
        precondition: UpdatePrecondition,
    ) -> Result<Option<i64>> {
        let stock: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE products
            SET stock = stock + $2, updated_at = NOW()
            WHERE id = $1 AND ($3::BIGINT IS NULL OR stock >= $3)
            RETURNING stock
            "#,
        )
        .bind(product_id.as_str())
        .bind(delta)
        .bind(precondition.min_required())
        .fetch_optional(&self.pool)
        .await?;

        Ok(stock)
    }

    async fn all_quantities(&self) -> Result<Vec<(ProductId, i64)>> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT id, stock FROM products ORDER BY id ASC")
                .fetch_all(&self.pool)
                .await?;

        Ok(rows
            .into_iter()
            .map(|(id, stock)| (ProductId::from(id), stock))
            .collect())
    }
}
