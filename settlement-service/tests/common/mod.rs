//! Test helper module for settlement-service integration tests.
//!
//! Spawns the real application on a random port. The store backend defaults
//! to in-memory; set TEST_MONGODB_URI to run the same suite against Mongo
//! with a throwaway database per test.

#![allow(dead_code)]

use chrono::Utc;
use mongodb::bson::oid::ObjectId;
use reqwest::header::{HeaderMap, HeaderValue};
use secrecy::Secret;
use service_core::config as core_config;
use settlement_service::config::{SettlementConfig, StoreBackend, StoreConfig};
use settlement_service::models::{BatchStatus, PaymentBatch, RecordId, Service, ServiceStatus};
use settlement_service::services::{EngineSettings, SettlementStore};
use settlement_service::startup::Application;
use std::sync::Arc;

pub struct TestApp {
    pub address: String,
    pub port: u16,
    pub store: Arc<dyn SettlementStore>,
    mongo: Option<MongoHandle>,
}

struct MongoHandle {
    uri: String,
    db_name: String,
}

impl TestApp {
    pub async fn spawn() -> Self {
        let mongo_uri = std::env::var("TEST_MONGODB_URI").ok();
        let db_name = format!("settlement_test_{}", uuid::Uuid::new_v4());

        let (backend, uri) = match &mongo_uri {
            Some(uri) => (StoreBackend::Mongo, uri.clone()),
            None => (
                StoreBackend::Memory,
                "mongodb://localhost:27017".to_string(),
            ),
        };

        let config = SettlementConfig {
            common: core_config::Config { port: 0 },
            store: StoreConfig {
                backend,
                uri: Secret::new(uri),
                database: db_name.clone(),
            },
            engine: EngineSettings::default(),
        };

        let app = Application::build(config)
            .await
            .expect("Failed to build test application");

        let port = app.port();
        let store = app.store();
        let address = format!("http://127.0.0.1:{}", port);

        tokio::spawn(async move {
            app.run_until_stopped().await.ok();
        });

        // Wait for the server to be ready by polling the health endpoint
        let client = reqwest::Client::new();
        let health_url = format!("{}/health", address);
        for _ in 0..50 {
            if client.get(&health_url).send().await.is_ok() {
                break;
            }
            tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
        }

        TestApp {
            address,
            port,
            store,
            mongo: mongo_uri.map(|uri| MongoHandle { uri, db_name }),
        }
    }

    /// Client that authenticates as the given actor.
    pub fn client(&self, actor_id: &str, role: &str) -> reqwest::Client {
        let mut headers = HeaderMap::new();
        headers.insert("x-actor-id", HeaderValue::from_str(actor_id).unwrap());
        headers.insert("x-actor-role", HeaderValue::from_str(role).unwrap());
        reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .expect("Failed to build test client")
    }

    pub fn admin(&self) -> reqwest::Client {
        self.client("admin-1", "admin")
    }

    pub fn finance(&self) -> reqwest::Client {
        self.client("finance-1", "finance")
    }

    pub fn partner(&self, partner_id: &str) -> reqwest::Client {
        self.client(partner_id, "partner")
    }

    /// Create a service through the API and return the response body.
    pub async fn create_service(&self, body: serde_json::Value) -> serde_json::Value {
        let response = self
            .admin()
            .post(format!("{}/services", self.address))
            .json(&body)
            .send()
            .await
            .expect("Failed to execute request");
        assert_eq!(response.status(), 201, "service creation failed");
        response.json().await.expect("Failed to parse JSON")
    }

    /// Create a payment batch through the API and return the response body.
    pub async fn create_batch(&self, body: serde_json::Value) -> serde_json::Value {
        let response = self
            .admin()
            .post(format!("{}/payments", self.address))
            .json(&body)
            .send()
            .await
            .expect("Failed to execute request");
        assert_eq!(response.status(), 201, "batch creation failed");
        response.json().await.expect("Failed to parse JSON")
    }

    /// Seed a service directly in the store, bypassing the API. Lets tests
    /// reproduce legacy identifier shapes the API would canonicalize.
    pub async fn seed_service(&self, service: &Service) {
        self.store
            .insert_service(service)
            .await
            .expect("Failed to seed service");
    }

    pub async fn seed_batch(&self, batch: &PaymentBatch) {
        self.store
            .insert_batch(batch)
            .await
            .expect("Failed to seed batch");
    }

    /// Cleanup test database after test completes. No-op for the in-memory
    /// backend.
    pub async fn cleanup(&self) {
        if let Some(mongo) = &self.mongo {
            let client = mongodb::Client::with_uri_str(&mongo.uri)
                .await
                .expect("Failed to connect for cleanup");
            client
                .database(&mongo.db_name)
                .drop(None)
                .await
                .expect("Failed to drop test database");
        }
    }
}

/// Service fixture with a native ObjectId, as a legacy importer would have
/// written it.
pub fn oid_service(oid: ObjectId, partner: &str, final_value: f64) -> Service {
    let now = Utc::now();
    Service {
        id: RecordId::Oid(oid),
        partner_id: RecordId::plain(partner),
        service_date: now,
        first_name: "Ana".to_string(),
        last_name: "Silva".to_string(),
        client_name: String::new(),
        park: String::new(),
        location: String::new(),
        guests: None,
        hopper: false,
        team: String::new(),
        service_type_id: "REIMBURSEMENT".to_string(),
        service_time: None,
        observations: String::new(),
        final_value,
        override_value: None,
        status: ServiceStatus::Pending,
        created_at: now,
        updated_at: now,
    }
}

/// Batch fixture seeded directly, with full control over link forms, status,
/// and recency.
pub fn seeded_batch(
    partner: &str,
    service_ids: Vec<RecordId>,
    status: BatchStatus,
    updated_at: chrono::DateTime<Utc>,
) -> PaymentBatch {
    PaymentBatch {
        id: RecordId::new(),
        partner_id: RecordId::plain(partner),
        partner_name: String::new(),
        period_from: None,
        period_to: None,
        week_key: None,
        week_start: None,
        week_end: None,
        service_ids,
        total: 0.0,
        status,
        notes: String::new(),
        notes_log: Vec::new(),
        created_at: updated_at,
        updated_at,
    }
}
