//! Webhook sender: posts user input to the bot and fetches bot metadata.
//!
//! [`HttpWebhook`] wraps a `reqwest::Client`.  Nothing is retried here: a
//! failed post is reported by the caller and the message is dropped.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;

use cw_domain::config::HttpConfig;
use cw_domain::error::{Error, Result};
use cw_domain::trace::TraceEvent;
use cw_protocol::{BotMetadata, PostBody};

/// Request/response channel to the bot backend.
#[async_trait]
pub trait Webhook: Send + Sync {
    /// POST one user input.  Any non-2xx status is an error.
    async fn post_message(&self, hook_url: &str, body: &PostBody) -> Result<()>;

    /// GET `<hook_url>?key=<api_key>` and read the bot's display name.
    async fn fetch_metadata(&self, hook_url: &str, api_key: &str) -> Result<BotMetadata>;
}

/// [`Webhook`] over HTTP.
///
/// Created once per widget; the underlying client keeps a connection pool.
#[derive(Debug, Clone)]
pub struct HttpWebhook {
    http: Client,
}

impl HttpWebhook {
    pub fn new(cfg: &HttpConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_millis(cfg.timeout_ms))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self { http })
    }
}

#[async_trait]
impl Webhook for HttpWebhook {
    async fn post_message(&self, hook_url: &str, body: &PostBody) -> Result<()> {
        let start = Instant::now();
        let resp = self
            .http
            .post(hook_url)
            .json(body)
            .send()
            .await
            .map_err(|e| Error::TransportSend(e.to_string()))?;

        let status = resp.status();
        TraceEvent::MessagePosted {
            status: status.as_u16(),
            duration_ms: start.elapsed().as_millis() as u64,
        }
        .emit();

        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(Error::TransportSend(format!("{status}: {text}")));
        }
        Ok(())
    }

    async fn fetch_metadata(&self, hook_url: &str, api_key: &str) -> Result<BotMetadata> {
        let start = Instant::now();
        let resp = self
            .http
            .get(hook_url)
            .query(&[("key", api_key)])
            .send()
            .await
            .map_err(|e| Error::MetadataFetch(e.to_string()))?;

        let status = resp.status();
        TraceEvent::MetadataFetched {
            status: status.as_u16(),
            duration_ms: start.elapsed().as_millis() as u64,
        }
        .emit();

        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(Error::MetadataFetch(format!("{status}: {text}")));
        }

        resp.json::<BotMetadata>()
            .await
            .map_err(|e| Error::MetadataFetch(format!("decoding metadata: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn webhook() -> HttpWebhook {
        HttpWebhook::new(&HttpConfig { timeout_ms: 5_000 }).unwrap()
    }

    fn body() -> PostBody {
        PostBody {
            data: json!({"_meta": {"origin": null, "pathname": null}}),
            api_key: "key-1".into(),
            input: "hello".into(),
            user_id_cookie: Some("sid".into()),
        }
    }

    #[tokio::test]
    async fn post_sends_json_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/widget-hook/w/p"))
            .and(body_json(json!({
                "data": {"_meta": {"origin": null, "pathname": null}},
                "api_key": "key-1",
                "input": "hello",
                "user_id_cookie": "sid"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let url = format!("{}/widget-hook/w/p", server.uri());
        webhook().post_message(&url, &body()).await.unwrap();
    }

    #[tokio::test]
    async fn post_non_ok_is_transport_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let url = format!("{}/widget-hook/w/p", server.uri());
        let err = webhook().post_message(&url, &body()).await.unwrap_err();
        match err {
            Error::TransportSend(msg) => assert!(msg.contains("boom"), "got {msg}"),
            other => panic!("expected TransportSend, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn metadata_passes_key_as_query() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/widget-hook/w/p"))
            .and(query_param("key", "key-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"name": "Helper"})))
            .mount(&server)
            .await;

        let url = format!("{}/widget-hook/w/p", server.uri());
        let meta = webhook().fetch_metadata(&url, "key-1").await.unwrap();
        assert_eq!(meta.name, "Helper");
    }

    #[tokio::test]
    async fn metadata_failure_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let url = format!("{}/widget-hook/w/p", server.uri());
        let err = webhook().fetch_metadata(&url, "bad").await.unwrap_err();
        assert!(matches!(err, Error::MetadataFetch(_)));
    }
}
