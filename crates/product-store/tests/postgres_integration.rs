//! PostgreSQL integration tests
//!
//! These tests use a shared PostgreSQL container and need Docker.
//! Run with:
//!
//! ```bash
//! cargo test -p product-store --test postgres_integration -- --ignored --test-threads=1
//! ```

use std::sync::Arc;

use product_store::{
    NewProduct, PostgresProductStore, ProductId, ProductPatch, ProductStore, SellerId,
};
use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

/// Shared container info - container stays alive for all tests
struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();
            PostgresProductStore::new(temp_pool.clone())
                .run_migrations()
                .await
                .unwrap();
            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

/// Get a fresh store with its own pool and an empty products table
async fn get_test_store() -> PostgresProductStore {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query("TRUNCATE TABLE products RESTART IDENTITY")
        .execute(&pool)
        .await
        .unwrap();

    PostgresProductStore::new(pool)
}

fn widget(quantity: u32) -> NewProduct {
    NewProduct {
        name: "Widget".to_string(),
        description: None,
        price: 12.5,
        quantity,
        category: "tools".to_string(),
    }
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn create_and_find_product() {
    let store = get_test_store().await;
    let seller = SellerId::new("s1");

    let created = store.create(&seller, widget(7)).await.unwrap();
    assert_eq!(created.seller_id, seller);
    assert_eq!(created.quantity, 7);

    let found = store.find(&seller, created.id).await.unwrap().unwrap();
    assert_eq!(found.name, "Widget");
    assert_eq!(found.price, 12.5);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn list_returns_newest_first() {
    let store = get_test_store().await;
    let seller = SellerId::new("s1");

    let a = store.create(&seller, widget(1)).await.unwrap();
    let b = store.create(&seller, widget(2)).await.unwrap();
    store
        .create(&SellerId::new("other"), widget(3))
        .await
        .unwrap();

    let listed = store.list(&seller).await.unwrap();
    let ids: Vec<ProductId> = listed.iter().map(|p| p.id).collect();
    assert_eq!(ids, vec![b.id, a.id]);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn conditional_update_returns_pre_image() {
    let store = get_test_store().await;
    let seller = SellerId::new("s1");
    let created = store.create(&seller, widget(9)).await.unwrap();

    let patch = ProductPatch {
        quantity: Some(2),
        price: Some(15.0),
        ..ProductPatch::default()
    };
    let before = store
        .update(&seller, created.id, &patch)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(before.quantity, 9);
    assert_eq!(before.price, 12.5);

    let after = store.find(&seller, created.id).await.unwrap().unwrap();
    assert_eq!(after.quantity, 2);
    assert_eq!(after.price, 15.0);
    assert_eq!(after.name, "Widget");
    assert!(after.updated_at >= before.updated_at);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn wrong_seller_matches_zero_rows() {
    let store = get_test_store().await;
    let owner = SellerId::new("owner");
    let intruder = SellerId::new("intruder");
    let created = store.create(&owner, widget(4)).await.unwrap();

    let updated = store
        .update(&intruder, created.id, &ProductPatch::quantity(0))
        .await
        .unwrap();
    assert!(updated.is_none());
    assert_eq!(store.delete(&intruder, created.id).await.unwrap(), 0);
    assert_eq!(store.delete(&owner, created.id).await.unwrap(), 1);
}
