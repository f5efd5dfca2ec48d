//! In-memory product catalog served over HTTP. This is the upstream the
//! feed server's [`HttpProductSource`](crate::source::HttpProductSource)
//! reads from.
use anyhow::{Context, Result};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::error::ApiError;
use crate::model::{ApiResponse, MessageResponse, ProductsResponse, Record};
use crate::validator;

/// A product must carry at least one of these to be accepted.
const CREATE_FIELDS: [&str; 2] = ["title", "price"];

#[derive(Debug, Clone, Default)]
pub struct Catalog {
    products: Arc<RwLock<Vec<Record>>>,
}

impl Catalog {
    pub fn new(products: Vec<Record>) -> Self {
        Self {
            products: Arc::new(RwLock::new(products)),
        }
    }

    /// Read a JSON array of product objects.
    pub async fn load_seed(path: &std::path::Path) -> Result<Vec<Record>> {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read seed file {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("invalid product seed in {}", path.display()))
    }

    pub async fn list(&self) -> Vec<Record> {
        self.products.read().await.clone()
    }

    pub async fn get(&self, id: &str) -> Option<Record> {
        self.products
            .read()
            .await
            .iter()
            .find(|p| has_id(p, id))
            .cloned()
    }

    pub async fn create(&self, mut product: Record) -> Result<Record, ApiError> {
        let outcome = validator::validate(&product, &CREATE_FIELDS);
        if outcome.missing_fields.len() == CREATE_FIELDS.len() {
            return Err(ApiError::BadRequest(
                "Please provide title and price of the product".into(),
            ));
        }

        let mut products = self.products.write().await;
        match product.get("id").filter(|v| validator::is_present(v)).map(id_key) {
            Some(id) => {
                if products.iter().any(|p| has_id(p, &id)) {
                    return Err(ApiError::BadRequest(format!(
                        "Product with id {id} already exists"
                    )));
                }
            }
            None => {
                product.insert("id", generate_id());
            }
        }
        products.push(product.clone());
        Ok(product)
    }

    pub async fn delete(&self, id: &str) -> bool {
        let mut products = self.products.write().await;
        match products.iter().position(|p| has_id(p, id)) {
            Some(index) => {
                products.remove(index);
                true
            }
            None => false,
        }
    }
}

/// Ids arrive as path segments, so non-string ids compare by their JSON text.
fn id_key(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn has_id(product: &Record, id: &str) -> bool {
    product.get("id").map(id_key).as_deref() == Some(id)
}

fn generate_id() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("prod{}", &suffix[..6])
}

pub fn router(catalog: Catalog) -> Router {
    Router::new()
        .route("/api/products", get(list_products))
        .route("/api/product/:id", get(get_product))
        .route("/api/create", post(create_product))
        .route("/api/delete/:id", delete(delete_product))
        .with_state(catalog)
}

async fn list_products(State(catalog): State<Catalog>) -> Json<ApiResponse<ProductsResponse>> {
    let data = catalog.list().await;
    Json(ApiResponse::ok(ProductsResponse {
        count: data.len(),
        data,
    }))
}

async fn get_product(
    State(catalog): State<Catalog>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<Record>>, ApiError> {
    let product = catalog
        .get(&id)
        .await
        .ok_or_else(|| ApiError::NotFound("Product not found".into()))?;
    Ok(Json(ApiResponse::ok(product)))
}

#[instrument(skip_all)]
async fn create_product(
    State(catalog): State<Catalog>,
    Json(product): Json<Record>,
) -> Result<(StatusCode, Json<ApiResponse<Record>>), ApiError> {
    let created = catalog.create(product).await?;
    info!(id = ?created.id(), "product created");
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(created))))
}

async fn delete_product(
    State(catalog): State<Catalog>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<MessageResponse>>, ApiError> {
    if !catalog.delete(&id).await {
        return Err(ApiError::NotFound("Product not found".into()));
    }
    info!(%id, "product deleted");
    Ok(Json(ApiResponse::ok(MessageResponse {
        message: "Product deleted".into(),
    })))
}
