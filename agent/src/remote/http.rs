//! Remote store reached over HTTP.
//!
//! Records live under `{base}/collections/{collection}`: `POST` creates and
//! answers `{"id": ...}`, `PUT /{id}` replaces and `DELETE /{id}` removes.

use async_trait::async_trait;
use moi_engine::RecordId;
use reqwest::{Client, RequestBuilder, StatusCode, Url};
use serde::Deserialize;
use std::time::Duration;

use super::{RemoteError, RemoteStore};

/// Failure to set up an [`HttpRemoteStore`].
#[derive(Debug, thiserror::Error)]
pub enum HttpStoreError {
    #[error("invalid remote url {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error(transparent)]
    Client(#[from] reqwest::Error),
}

#[derive(Deserialize)]
struct Created {
    id: RecordId,
}

/// JSON-over-HTTP remote store.
#[derive(Debug, Clone)]
pub struct HttpRemoteStore {
    client: Client,
    base_url: Url,
    token: Option<String>,
}

impl HttpRemoteStore {
    /// Build a client for `base_url`; `timeout` bounds every request.
    pub fn new(
        base_url: impl Into<String>,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, HttpStoreError> {
        let raw = base_url.into();
        let base_url = Url::parse(&raw).map_err(|e| HttpStoreError::InvalidUrl {
            url: raw.clone(),
            reason: e.to_string(),
        })?;
        if base_url.cannot_be_a_base() {
            return Err(HttpStoreError::InvalidUrl {
                url: raw,
                reason: "not a base url".to_string(),
            });
        }

        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url,
            token,
        })
    }

    /// Endpoint polled by the connectivity probe.
    pub fn health_url(&self) -> String {
        self.url(&["health"]).to_string()
    }

    /// The underlying client, shared with the probe.
    pub fn client(&self) -> &Client {
        &self.client
    }

    fn collection_url(&self, collection: &str) -> Url {
        self.url(&["collections", collection])
    }

    fn record_url(&self, collection: &str, id: &str) -> Url {
        self.url(&["collections", collection, id])
    }

    /// Append `segments` to the base path, percent-encoding each one.
    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        // Checked in `new`: the base can take path segments.
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn send(&self, request: RequestBuilder) -> Result<reqwest::Response, RemoteError> {
        let request = match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        };

        let response = request
            .send()
            .await
            .map_err(|e| RemoteError::Unavailable(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let reason = if body.is_empty() {
            status.to_string()
        } else {
            format!("{status}: {body}")
        };
        Err(classify(status, reason))
    }
}

/// 408 and 429 are worth retrying like any 5xx; every other 4xx is final.
fn classify(status: StatusCode, reason: String) -> RemoteError {
    if status.is_client_error()
        && status != StatusCode::REQUEST_TIMEOUT
        && status != StatusCode::TOO_MANY_REQUESTS
    {
        RemoteError::Rejected(reason)
    } else {
        RemoteError::Unavailable(reason)
    }
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
    async fn create(
        &self,
        collection: &str,
        payload: &serde_json::Value,
    ) -> Result<RecordId, RemoteError> {
        let response = self
            .send(self.client.post(self.collection_url(collection)).json(payload))
            .await?;
        let created: Created = response
            .json()
            .await
            .map_err(|e| RemoteError::Unavailable(format!("unreadable create response: {e}")))?;
        Ok(created.id)
    }

    async fn update(
        &self,
        collection: &str,
        id: &str,
        payload: &serde_json::Value,
    ) -> Result<(), RemoteError> {
        self.send(self.client.put(self.record_url(collection, id)).json(payload))
            .await?;
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), RemoteError> {
        self.send(self.client.delete(self.record_url(collection, id)))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        let cases = [
            (StatusCode::BAD_REQUEST, false),
            (StatusCode::NOT_FOUND, false),
            (StatusCode::UNPROCESSABLE_ENTITY, false),
            (StatusCode::REQUEST_TIMEOUT, true),
            (StatusCode::TOO_MANY_REQUESTS, true),
            (StatusCode::INTERNAL_SERVER_ERROR, true),
            (StatusCode::SERVICE_UNAVAILABLE, true),
        ];

        for (status, retryable) in cases {
            let error = classify(status, status.to_string());
            assert_eq!(
                matches!(error, RemoteError::Unavailable(_)),
                retryable,
                "{status}"
            );
        }
    }

    #[test]
    fn test_urls() {
        let store =
            HttpRemoteStore::new("https://api.moi.test/", None, Duration::from_secs(1)).unwrap();
        assert_eq!(store.health_url(), "https://api.moi.test/health");
        assert_eq!(
            store.record_url("events", "ev_1").as_str(),
            "https://api.moi.test/collections/events/ev_1"
        );
        assert_eq!(
            store.collection_url("events").as_str(),
            "https://api.moi.test/collections/events"
        );
    }

    #[test]
    fn test_record_id_is_one_segment() {
        let store =
            HttpRemoteStore::new("https://api.moi.test/v1", None, Duration::from_secs(1)).unwrap();
        assert_eq!(
            store.record_url("events", "a/b?c#d").as_str(),
            "https://api.moi.test/v1/collections/events/a%2Fb%3Fc%23d"
        );
    }

    #[test]
    fn test_invalid_base_url() {
        let err = HttpRemoteStore::new("not a url", None, Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, HttpStoreError::InvalidUrl { .. }));

        let err = HttpRemoteStore::new("mailto:ops@moi.test", None, Duration::from_secs(1))
            .unwrap_err();
        assert!(matches!(err, HttpStoreError::InvalidUrl { .. }));
    }

    #[tokio::test]
    async fn test_unreachable_host_is_unavailable() {
        let store =
            HttpRemoteStore::new("http://127.0.0.1:1", None, Duration::from_millis(500)).unwrap();
        let err = store
            .create("events", &serde_json::json!({ "name": "Gala" }))
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::Unavailable(_)));
    }
}
