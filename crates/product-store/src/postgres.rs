use async_trait::async_trait;
use sqlx::{PgPool, Row, postgres::PgRow};

use crate::{
    NewProduct, Product, ProductId, ProductPatch, Result, SellerId, StoreError,
    store::ProductStore,
};

const PRODUCT_COLUMNS: &str =
    "id, seller_id, name, description, price, quantity, category, created_at, updated_at";

/// PostgreSQL-backed product store.
#[derive(Clone)]
pub struct PostgresProductStore {
    pool: PgPool,
}

impl PostgresProductStore {
    /// Creates a new PostgreSQL product store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    ///
    /// The migration set also creates the audit log and event bus tables, so
    /// a deployment sharing one database only needs to run it once.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        tracing::info!("database migrations applied");
        Ok(())
    }

    fn row_to_product(row: PgRow) -> Result<Product> {
        let quantity: i64 = row.try_get("quantity")?;
        let quantity = u32::try_from(quantity)
            .map_err(|_| StoreError::Corrupt(format!("quantity out of range: {quantity}")))?;

        Ok(Product {
            id: ProductId::new(row.try_get("id")?),
            seller_id: SellerId::new(row.try_get::<String, _>("seller_id")?),
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            price: row.try_get("price")?,
            quantity,
            category: row.try_get("category")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl ProductStore for PostgresProductStore {
    async fn create(&self, seller_id: &SellerId, product: NewProduct) -> Result<Product> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO products (seller_id, name, description, price, quantity, category)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {PRODUCT_COLUMNS}
            "#
        ))
        .bind(seller_id.as_str())
        .bind(&product.name)
        .bind(&product.description)
        .bind(product.price)
        .bind(i64::from(product.quantity))
        .bind(&product.category)
        .fetch_one(&self.pool)
        .await?;

        Self::row_to_product(row)
    }

    async fn list(&self, seller_id: &SellerId) -> Result<Vec<Product>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {PRODUCT_COLUMNS}
            FROM products
            WHERE seller_id = $1
            ORDER BY id DESC
            "#
        ))
        .bind(seller_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_product).collect()
    }

    async fn find(&self, seller_id: &SellerId, product_id: ProductId) -> Result<Option<Product>> {
        let row: Option<PgRow> = sqlx::query(&format!(
            r#"
            SELECT {PRODUCT_COLUMNS}
            FROM products
            WHERE id = $1 AND seller_id = $2
            "#
        ))
        .bind(product_id.as_i64())
        .bind(seller_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_product).transpose()
    }

    async fn update(
        &self,
        seller_id: &SellerId,
        product_id: ProductId,
        patch: &ProductPatch,
    ) -> Result<Option<Product>> {
        // The CTE locks the matched row and hands back its pre-image in the
        // same statement as the write.
        let row: Option<PgRow> = sqlx::query(
            r#"
            WITH prior AS (
                SELECT id, seller_id, name, description, price, quantity, category,
                       created_at, updated_at
                FROM products
                WHERE id = $1 AND seller_id = $2
                FOR UPDATE
            )
            UPDATE products AS p SET
                name = COALESCE($3, p.name),
                description = COALESCE($4, p.description),
                price = COALESCE($5, p.price),
                quantity = COALESCE($6, p.quantity),
                category = COALESCE($7, p.category),
                updated_at = NOW()
            FROM prior
            WHERE p.id = prior.id
            RETURNING prior.id, prior.seller_id, prior.name, prior.description, prior.price,
                      prior.quantity, prior.category, prior.created_at, prior.updated_at
            "#,
        )
        .bind(product_id.as_i64())
        .bind(seller_id.as_str())
        .bind(&patch.name)
        .bind(&patch.description)
        .bind(patch.price)
        .bind(patch.quantity.map(i64::from))
        .bind(&patch.category)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_product).transpose()
    }

    async fn delete(&self, seller_id: &SellerId, product_id: ProductId) -> Result<u64> {
        let result = sqlx::query("DELETE FROM products WHERE id = $1 AND seller_id = $2")
            .bind(product_id.as_i64())
            .bind(seller_id.as_str())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
