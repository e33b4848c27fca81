//! Transfer-proof object storage.

use crate::config::StorageConfig;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Storage could not sign a URL.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("storage error: {0}")]
pub struct StorageError(pub String);

/// Produces time-limited retrieval URLs for stored objects.
#[async_trait]
pub trait ProofStorage: Send + Sync {
    /// Sign `path` for `ttl`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the storage service refuses.
    async fn signed_url(&self, path: &str, ttl: Duration) -> Result<String, StorageError>;
}

/// Sign an optional path; an absent path yields `None` without a call.
///
/// # Errors
///
/// Returns [`StorageError`] if signing a present path fails.
pub async fn sign_optional(
    storage: &dyn ProofStorage,
    path: Option<&str>,
    ttl: Duration,
) -> Result<Option<String>, StorageError> {
    match path.map(str::trim).filter(|p| !p.is_empty()) {
        Some(path) => storage.signed_url(path, ttl).await.map(Some),
        None => Ok(None),
    }
}

/// Hosted object storage (`POST {base}/object/sign/{bucket}/{path}`).
#[derive(Clone, Debug)]
pub struct HttpProofStorage {
    http_client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    bucket: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SignBody {
    expires_in: u64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignResponse {
    #[serde(alias = "signedURL")]
    signed_url: String,
}

impl HttpProofStorage {
    /// Client against `base_url`.
    #[must_use]
    pub fn new(base_url: &str, config: &StorageConfig) -> Self {
        Self {
            http_client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            bucket: config.bucket.clone(),
        }
    }
}

#[async_trait]
impl ProofStorage for HttpProofStorage {
    async fn signed_url(&self, path: &str, ttl: Duration) -> Result<String, StorageError> {
        let url = format!(
            "{}/object/sign/{}/{}",
            self.base_url,
            self.bucket,
            path.trim_start_matches('/')
        );
        let mut request = self.http_client.post(&url).json(&SignBody {
            expires_in: ttl.as_secs(),
        });
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key).header("apikey", api_key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| StorageError(e.to_string()))?;
        if !response.status().is_success() {
            return Err(StorageError(format!("sign answered {}", response.status())));
        }
        let signed: SignResponse = response
            .json()
            .await
            .map_err(|e| StorageError(e.to_string()))?;

        if signed.signed_url.starts_with("http") {
            Ok(signed.signed_url)
        } else {
            Ok(format!("{}{}", self.base_url, signed.signed_url))
        }
    }
}

/// Storage that cannot sign anything; listings show no proof links.
#[derive(Clone, Copy, Debug, Default)]
pub struct UnconfiguredStorage;

#[async_trait]
impl ProofStorage for UnconfiguredStorage {
    async fn signed_url(&self, _path: &str, _ttl: Duration) -> Result<String, StorageError> {
        Err(StorageError("object storage is not configured".to_string()))
    }
}
