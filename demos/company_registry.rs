//! Company registry behind the idempotency coordinator and ETags.
//!
//! Run with `RUST_ENV=dev cargo run --example company_registry`, then:
//!
//! ```text
//! curl -i -X POST localhost:5000/api/company/register \
//!      -H 'content-type: application/json' -d '{"name":"Acme"}'
//! curl -i localhost:5000/api/companies
//! ```
//!
//! Repeating the POST replays the first response with the same
//! `X-Idempotency-Key`; repeating the GET with `If-None-Match` yields 304.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    sync::{Arc, RwLock},
    time::SystemTime,
};
use supplygraph_edge::{
    Config, Error, FluentRouter, HttpETagConfig, HttpIdempotencyConfig, Result,
};

const DB_NAME: &str = "supplychain";
const COLLECTION: &str = "companies";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct Company {
    #[serde(rename = "_id")]
    id: String,
    name: String,
    status: String,
    created_at: String,
    updated_at: String,
}

/// Public view returned by registration.
#[derive(Debug, Serialize)]
struct Registered {
    #[serde(rename = "_id")]
    id: String,
    name: String,
    status: String,
}

#[derive(Debug, Deserialize)]
struct Registration {
    name: Option<String>,
}

#[derive(Clone, Default)]
struct Registry {
    by_name: Arc<RwLock<BTreeMap<String, Company>>>,
}

fn now() -> String {
    humantime::format_rfc3339_millis(SystemTime::now()).to_string()
}

impl Registry {
    /// Inserts `name` or refreshes its `updatedAt`. Returns the stored
    /// company and whether it was created.
    fn upsert(&self, name: &str) -> Result<(Company, bool)> {
        let mut companies = self
            .by_name
            .write()
            .map_err(|_| Error::internal("registry lock poisoned"))?;
        let stamp = now();

        if let Some(existing) = companies.get_mut(name) {
            existing.updated_at = stamp;
            return Ok((existing.clone(), false));
        }

        let company = Company {
            id: uuid::Uuid::now_v7().simple().to_string(),
            name: name.to_owned(),
            status: "new".to_owned(),
            created_at: stamp.clone(),
            updated_at: stamp,
        };
        companies.insert(name.to_owned(), company.clone());
        Ok((company, true))
    }

    fn list(&self) -> Result<Vec<Company>> {
        let companies = self
            .by_name
            .read()
            .map_err(|_| Error::internal("registry lock poisoned"))?;
        Ok(companies.values().cloned().collect())
    }

    fn find(&self, id: &str) -> Result<Option<Company>> {
        let companies = self
            .by_name
            .read()
            .map_err(|_| Error::internal("registry lock poisoned"))?;
        Ok(companies.values().find(|c| c.id == id).cloned())
    }
}

async fn register(
    State(registry): State<Registry>,
    Json(registration): Json<Registration>,
) -> Result<(StatusCode, Json<Registered>)> {
    let name = registration
        .name
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .ok_or_else(|| Error::invalid_input("name is required"))?;

    let (company, created) = registry.upsert(name)?;
    tracing::info!(id = %company.id, created, "Registered company");

    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((
        status,
        Json(Registered {
            id: company.id,
            name: company.name,
            status: company.status,
        }),
    ))
}

async fn list_companies(State(registry): State<Registry>) -> Result<Json<Vec<Company>>> {
    Ok(Json(registry.list()?))
}

async fn get_company(
    State(registry): State<Registry>,
    Path(id): Path<String>,
) -> Result<Json<Company>> {
    registry
        .find(&id)?
        .map(Json)
        .ok_or_else(|| Error::not_found(format!("company {id} not found")))
}

async fn debug_db() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "db": DB_NAME, "collection": COLLECTION }))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "backend": "healthy", "timestamp": now() }))
}

#[tokio::main]
async fn main() -> Result<()> {
    let mut config = Config::default();
    if config.http.idempotency.is_none() {
        config.http.idempotency = Some(
            HttpIdempotencyConfig::default().with_stats_route("/api/idempotency/stats"),
        );
    }
    if config.http.etag.is_none() {
        config.http.etag = Some(HttpETagConfig::default());
    }
    config.setup_tracing();

    FluentRouter::<Registry>::with_state(config, Registry::default())?
        .route("/api/company/register", post(register))
        .route("/api/companies", get(list_companies))
        .route("/api/company/{id}", get(get_company))
        .route("/api/debug/db", get(debug_db))
        .route("/api/health", get(health))
        .setup_middleware()
        .await?
        .start()
        .await
}
