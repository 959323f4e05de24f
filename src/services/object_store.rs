use async_trait::async_trait;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// "Permanent" signed links are approximated with a decade-long expiry;
/// the bucket stays private and links survive any realistic product
/// lifetime.
pub const LONG_LIVED_URL_TTL: Duration = Duration::from_secs(10 * 365 * 24 * 60 * 60);

#[derive(Debug, thiserror::Error)]
pub enum ObjectStoreError {
    #[error("upload failed: {0}")]
    Upload(String),
    #[error("signing failed: {0}")]
    Signing(String),
}

/// Opaque storage contract: store bytes, get back a durable URL. The
/// signed-URL variant serves private buckets.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, ObjectStoreError>;

    fn signed_url(&self, key: &str, expires_in: Duration) -> Result<String, ObjectStoreError>;
}

/// Gateway-backed store: PUTs through an internal storage endpoint and
/// hands out URLs under the public CDN origin.
pub struct HttpObjectStore {
    client: reqwest::Client,
    upload_url: String,
    public_url: String,
    signing_key: Vec<u8>,
}

impl HttpObjectStore {
    pub fn new(
        client: reqwest::Client,
        upload_url: impl Into<String>,
        public_url: impl Into<String>,
        signing_secret: impl AsRef<[u8]>,
    ) -> Self {
        Self {
            client,
            upload_url: upload_url.into(),
            public_url: public_url.into(),
            signing_key: signing_secret.as_ref().to_vec(),
        }
    }

    pub fn from_settings(client: reqwest::Client, settings: &crate::config::StorageSettings) -> Self {
        Self::new(
            client,
            settings.upload_url.clone(),
            settings.public_url.clone(),
            settings.signing_secret.as_bytes(),
        )
    }

    fn sign(&self, key: &str, expires_at: u64) -> Result<String, ObjectStoreError> {
        let mut mac = HmacSha256::new_from_slice(&self.signing_key)
            .map_err(|e| ObjectStoreError::Signing(e.to_string()))?;
        mac.update(key.as_bytes());
        mac.update(b"\n");
        mac.update(expires_at.to_string().as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Constant-time check used by the serving edge; exposed here so the
    /// signer and verifier cannot drift apart.
    pub fn verify_signature(
        &self,
        key: &str,
        expires_at: u64,
        signature: &str,
    ) -> Result<bool, ObjectStoreError> {
        let expected = self.sign(key, expires_at)?;
        Ok(expected.as_bytes().ct_eq(signature.as_bytes()).into())
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, ObjectStoreError> {
        let response = self
            .client
            .put(format!("{}/{}", self.upload_url.trim_end_matches('/'), key))
            .header("content-type", content_type)
            .body(bytes)
            .send()
            .await
            .map_err(|e| ObjectStoreError::Upload(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ObjectStoreError::Upload(format!(
                "storage gateway returned {}",
                response.status()
            )));
        }

        Ok(format!("{}/{}", self.public_url.trim_end_matches('/'), key))
    }

    fn signed_url(&self, key: &str, expires_in: Duration) -> Result<String, ObjectStoreError> {
        let expires_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| ObjectStoreError::Signing(e.to_string()))?
            .saturating_add(expires_in)
            .as_secs();
        let signature = self.sign(key, expires_at)?;
        Ok(format!(
            "{}/{}?expires={}&signature={}",
            self.public_url.trim_end_matches('/'),
            key,
            expires_at,
            signature
        ))
    }
}

#[derive(Default)]
pub struct MockObjectStore {
    pub uploads: std::sync::Mutex<Vec<(String, usize, String)>>,
}

impl MockObjectStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ObjectStore for MockObjectStore {
    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, ObjectStoreError> {
        self.uploads
            .lock()
            .unwrap()
            .push((key.to_string(), bytes.len(), content_type.to_string()));
        Ok(format!("https://cdn.example.test/{key}"))
    }

    fn signed_url(&self, key: &str, _expires_in: Duration) -> Result<String, ObjectStoreError> {
        Ok(format!("https://cdn.example.test/{key}?signature=mock"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn store(upload_url: String) -> HttpObjectStore {
        HttpObjectStore::new(
            reqwest::Client::new(),
            upload_url,
            "https://cdn.example.test",
            b"storage-signing-secret",
        )
    }

    #[tokio::test]
    async fn put_returns_public_url() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(PUT)
                .path("/uploads/logos/acme.png")
                .header("content-type", "image/png");
            then.status(200);
        });

        let store = store(server.url("/uploads"));
        let url = store
            .put("logos/acme.png", vec![0u8; 16], "image/png")
            .await
            .unwrap();
        assert_eq!(url, "https://cdn.example.test/logos/acme.png");
        mock.assert();
    }

    #[tokio::test]
    async fn gateway_failure_is_an_upload_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(PUT);
            then.status(500);
        });

        let store = store(server.url("/uploads"));
        let result = store.put("logos/acme.png", vec![0u8; 16], "image/png").await;
        assert!(matches!(result, Err(ObjectStoreError::Upload(_))));
    }

    #[test]
    fn signed_url_round_trips_and_rejects_tampering() {
        let store = store("https://storage.internal".into());
        let url = store
            .signed_url("exports/acme.pdf", LONG_LIVED_URL_TTL)
            .unwrap();

        let expires: u64 = url
            .split("expires=")
            .nth(1)
            .and_then(|rest| rest.split('&').next())
            .and_then(|v| v.parse().ok())
            .unwrap();
        let signature = url.split("signature=").nth(1).unwrap();

        assert!(store
            .verify_signature("exports/acme.pdf", expires, signature)
            .unwrap());
        assert!(!store
            .verify_signature("exports/other.pdf", expires, signature)
            .unwrap());
        assert!(!store
            .verify_signature("exports/acme.pdf", expires + 1, signature)
            .unwrap());
    }
}
