//! Product endpoints, scoped to the seller in `x-seller-id`.

use std::fmt::Write as _;
use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use common::ProductId;
use product_store::{NewProduct, Product, ProductPatch};
use serde::Serialize;

use crate::error::ApiError;
use crate::seller::SellerContext;
use crate::{ApiResponse, AppState};

/// Header row of the CSV export.
pub const CSV_HEADER: &str = "id,name,price,quantity,category\n";

#[derive(Debug, Serialize)]
pub struct RemovedProduct {
    pub id: ProductId,
}

/// GET /products: the seller's products, newest first.
#[tracing::instrument(skip_all, fields(seller_id = %seller))]
pub async fn list(
    State(state): State<Arc<AppState>>,
    SellerContext(seller): SellerContext,
) -> Result<Json<ApiResponse<Vec<Product>>>, ApiError> {
    let products = state.products.list(&seller).await?;
    Ok(ApiResponse::ok(products))
}

/// POST /products: create a product.
#[tracing::instrument(skip_all, fields(seller_id = %seller))]
pub async fn create(
    State(state): State<Arc<AppState>>,
    SellerContext(seller): SellerContext,
    body: Result<Json<NewProduct>, JsonRejection>,
) -> Result<(StatusCode, Json<ApiResponse<Product>>), ApiError> {
    let Json(input) = body?;
    let product = state.products.create(&seller, input).await?;
    Ok((StatusCode::CREATED, ApiResponse::ok(product)))
}

/// PUT|PATCH /products/:id: change some fields of a product.
#[tracing::instrument(skip_all, fields(seller_id = %seller))]
pub async fn update(
    State(state): State<Arc<AppState>>,
    SellerContext(seller): SellerContext,
    id: Result<Path<i64>, PathRejection>,
    body: Result<Json<ProductPatch>, JsonRejection>,
) -> Result<Json<ApiResponse<Product>>, ApiError> {
    let Path(id) = id?;
    let Json(patch) = body?;
    let product = state
        .products
        .update(&seller, ProductId::new(id), patch)
        .await?;
    Ok(ApiResponse::ok(product))
}

/// DELETE /products/:id: remove a product.
#[tracing::instrument(skip_all, fields(seller_id = %seller))]
pub async fn remove(
    State(state): State<Arc<AppState>>,
    SellerContext(seller): SellerContext,
    id: Result<Path<i64>, PathRejection>,
) -> Result<Json<ApiResponse<RemovedProduct>>, ApiError> {
    let Path(id) = id?;
    let id = state.products.remove(&seller, ProductId::new(id)).await?;
    Ok(ApiResponse::ok(RemovedProduct { id }))
}

/// GET /products/export: the seller's products as CSV.
#[tracing::instrument(skip_all, fields(seller_id = %seller))]
pub async fn export(
    State(state): State<Arc<AppState>>,
    SellerContext(seller): SellerContext,
) -> Result<impl IntoResponse, ApiError> {
    let products = state.products.list(&seller).await?;
    let csv = to_csv(&products);
    tracing::debug!(rows = products.len(), "products exported");

    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"products.csv\"",
            ),
        ],
        csv,
    ))
}

/// Renders products as CSV: numbers bare, text fields quoted.
pub fn to_csv(products: &[Product]) -> String {
    let mut csv = String::from(CSV_HEADER);
    for p in products {
        // Writing into a String cannot fail.
        let _ = writeln!(
            csv,
            "{},{},{},{},{}",
            p.id,
            quoted(&p.name),
            p.price,
            p.quantity,
            quoted(&p.category)
        );
    }
    csv
}

fn quoted(field: &str) -> String {
    format!("\"{}\"", field.replace('"', "\"\""))
}
