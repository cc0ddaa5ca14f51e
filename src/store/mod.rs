use std::fmt;
use std::time::Duration;
use tracing::{debug, warn};

use crate::models::{RecordFields, RecordPatch};

/// Ошибки удалённого хранилища записей (для разбора и логирования)
#[derive(Debug)]
pub enum StoreError {
    ParseResponse(String),
    Network(String),
    Http { status: u16, message: String },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::ParseResponse(s) => write!(f, "Parse response: {}", s),
            StoreError::Network(s) => write!(f, "Network: {}", s),
            StoreError::Http { status, message } => write!(f, "HTTP {}: {}", status, message),
        }
    }
}

/// Конфигурация клиента хранилища (api_base_url, приложение, таймауты)
#[derive(Clone)]
pub struct StoreConfig {
    pub api_base_url: String,
    pub app_id: u64,
    /// API токен; транспортная аутентификация за пределами этого заголовка —
    /// забота внешней системы
    pub api_token: String,
    pub http_timeout_secs: u64,
    /// App version sent in X-App-Version header for debugging version skew
    pub app_version: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            api_base_url: "https://example.kintone.com/k/v1".to_string(),
            app_id: 1,
            api_token: String::new(),
            http_timeout_secs: 30,
            app_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Клиент удалённого авторитетного хранилища записей.
/// Контракт: read(record_id) -> поля; patch(record_id, частичные поля) -> ack.
/// Каждый patch идемпотентен сам по себе; merge-гарантий между конкурентными
/// писателями нет — last-write-wins.
#[derive(Clone)]
pub struct RecordStoreClient {
    pub(crate) client: reqwest::Client,
    pub(crate) api_base_url: String,
    pub(crate) app_id: u64,
    pub(crate) api_token: String,
    pub(crate) app_version: String,
}

impl RecordStoreClient {
    pub fn new(config: StoreConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            api_base_url: config.api_base_url,
            app_id: config.app_id,
            api_token: config.api_token,
            app_version: config.app_version,
        }
    }

    /// Прочитать поля таймера из записи
    pub async fn read(&self, record_id: &str) -> Result<RecordFields, StoreError> {
        let url = format!("{}/record.json", self.api_base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("app", self.app_id.to_string()), ("id", record_id.to_string())])
            .header("X-Api-Token", &self.api_token)
            .header("X-App-Version", &self.app_version)
            .send()
            .await
            .map_err(|e| StoreError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = if body.is_empty() {
                status.canonical_reason().unwrap_or("Unknown").into()
            } else {
                body
            };
            return Err(StoreError::Http {
                status: status.as_u16(),
                message,
            });
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| StoreError::ParseResponse(e.to_string()))?;
        let record = json
            .get("record")
            .ok_or_else(|| StoreError::ParseResponse("Missing 'record' in response".into()))?;

        debug!("[STORE] Read record {} ok", record_id);
        Ok(RecordFields::from_wire(record))
    }

    /// Пропатчить часть полей записи. Пустой патч — no-op.
    pub async fn patch(&self, record_id: &str, patch: &RecordPatch) -> Result<(), StoreError> {
        if patch.is_empty() {
            return Ok(());
        }

        let url = format!("{}/record.json", self.api_base_url);
        let body = serde_json::json!({
            "app": self.app_id,
            "id": record_id,
            "record": patch.to_wire(),
        });

        let response = self
            .client
            .put(&url)
            .header("Content-Type", "application/json")
            .header("X-Api-Token", &self.api_token)
            .header("X-App-Version", &self.app_version)
            .json(&body)
            .send()
            .await
            .map_err(|e| StoreError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = if text.is_empty() {
                status.canonical_reason().unwrap_or("Unknown").into()
            } else {
                text
            };
            warn!(
                "[STORE] Patch for record {} failed: HTTP {}",
                record_id,
                status.as_u16()
            );
            return Err(StoreError::Http {
                status: status.as_u16(),
                message,
            });
        }

        debug!("[STORE] Patch for record {} ok", record_id);
        Ok(())
    }
}
