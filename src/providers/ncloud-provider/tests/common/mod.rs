#![allow(dead_code)]

use chrono::{Duration, Utc};
use ncloud_core::config::{ProviderConfig, RetryConfig};
use ncloud_core::provider::Provider;
use ncloud_core::storage::{MemoryStorage, SessionStorage};
use ncloud_provider::NcloudProvider;
use serde_json::{json, Value};
use std::sync::Arc;

pub const SESSION_KEY: &str = "ncloud/session";
pub const COOKIE: &str = "MUSIC_U=old-token; __csrf=c1";

/// Fast retries and a generous rate limit so tests run quickly.
pub fn config(base_url: &str) -> ProviderConfig {
    let mut config = ProviderConfig::new(base_url, 2_000, 1_000.0);
    config.rate_limit_burst = Some(100);
    config.retry = RetryConfig {
        max_retries: 3,
        base_delay_ms: 10,
        max_delay_ms: 100,
    };
    config
}

pub fn signed_in_storage() -> Arc<MemoryStorage> {
    storage_expiring_in(Duration::days(20))
}

/// A persisted session whose cookie expires `lifetime` from now.
pub fn storage_expiring_in(lifetime: Duration) -> Arc<MemoryStorage> {
    let storage = Arc::new(MemoryStorage::new());
    let record = json!({
        "userId": "1001",
        "accessToken": COOKIE,
        "refreshToken": COOKIE,
        "expiresAt": (Utc::now() + lifetime).timestamp_millis(),
    });
    storage
        .store(SESSION_KEY, &record.to_string())
        .expect("seed session");
    storage
}

pub async fn loaded(base_url: &str, storage: Arc<dyn SessionStorage>) -> NcloudProvider {
    let provider = NcloudProvider::new(storage);
    provider
        .on_load(config(base_url))
        .await
        .expect("provider loads");
    provider
}

pub fn song(id: u64, name: &str) -> Value {
    json!({
        "id": id,
        "name": name,
        "ar": [{"id": 7, "name": "Pianist"}],
        "al": {"id": 70, "name": "Nocturnes", "picUrl": "https://img.example/70.jpg"},
        "dt": 240000
    })
}

pub fn search_body(songs: Vec<Value>) -> Value {
    json!({"code": 200, "result": {"songs": songs, "songCount": 2}})
}

