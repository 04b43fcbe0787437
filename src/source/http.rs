use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::SourceConfig;

use super::{BrowseItem, Reading, SourceClient, SourceError};

/// JSON-over-HTTP adapter for an OpenOPC-style data-access gateway.
///
/// The gateway process sits next to the DA server and exposes the client
/// operations as POST endpoints; this adapter keeps the session id it hands
/// out on connect and replays it on every call.
pub struct HttpSourceClient {
    http: reqwest::Client,
    base: String,
    session: Option<String>,
}

#[derive(Serialize)]
struct ConnectRequest<'a> {
    server: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    host: Option<&'a str>,
}

#[derive(Deserialize)]
struct ConnectResponse {
    session: String,
}

#[derive(Serialize)]
struct ListRequest<'a> {
    session: &'a str,
    pattern: &'a str,
}

#[derive(Deserialize)]
struct ListResponse {
    items: Vec<BrowseItem>,
}

#[derive(Serialize)]
struct ReadRequest<'a> {
    session: &'a str,
    tags: &'a [String],
    group: &'a str,
    update: u32,
}

#[derive(Deserialize)]
struct ReadResponse {
    rows: Vec<Reading>,
}

#[derive(Serialize)]
struct GroupRequest<'a> {
    session: &'a str,
    group: &'a str,
}

#[derive(Serialize)]
struct CloseRequest<'a> {
    session: &'a str,
}

impl HttpSourceClient {
    /// Creates a client for the configured gateway endpoint.
    pub fn new(cfg: &SourceConfig) -> Result<Self, SourceError> {
        let timeout = if cfg.timeout.is_zero() {
            Duration::from_secs(5)
        } else {
            cfg.timeout
        };

        let http = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            http,
            base: cfg.gateway_url.trim_end_matches('/').to_string(),
            session: None,
        })
    }

    fn session(&self) -> Result<&str, SourceError> {
        self.session.as_deref().ok_or(SourceError::NotConnected)
    }

    /// POSTs a JSON request and deserializes the JSON response.
    async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, SourceError>
    where
        B: Serialize,
        T: serde::de::DeserializeOwned,
    {
        let url = format!("{}{}", self.base, path);

        let response = self.http.post(&url).json(body).send().await?;

        let status = response.status();

        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(SourceError::Gateway(format!(
                "unexpected status {status} from {path}: {detail}"
            )));
        }

        Ok(response.json().await?)
    }

    /// POSTs a JSON request, ignoring the response body.
    async fn post_ack<B: Serialize>(&self, path: &str, body: &B) -> Result<(), SourceError> {
        let url = format!("{}{}", self.base, path);

        let response = self.http.post(&url).json(body).send().await?;

        let status = response.status();

        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(SourceError::Gateway(format!(
                "unexpected status {status} from {path}: {detail}"
            )));
        }

        Ok(())
    }
}

impl SourceClient for HttpSourceClient {
    async fn connect(&mut self, server: &str, host: Option<&str>) -> Result<(), SourceError> {
        let resp: ConnectResponse = self
            .post_json("/connect", &ConnectRequest { server, host })
            .await?;

        debug!(server, host = host.unwrap_or("local"), "gateway session opened");
        self.session = Some(resp.session);

        Ok(())
    }

    async fn list(&self, pattern: &str) -> Result<Vec<BrowseItem>, SourceError> {
        let session = self.session()?;

        let resp: ListResponse = self
            .post_json("/list", &ListRequest { session, pattern })
            .await?;

        Ok(resp.items)
    }

    async fn read(
        &self,
        tags: &[String],
        group: &str,
        update: u32,
    ) -> Result<Vec<Reading>, SourceError> {
        let session = self.session()?;

        let resp: ReadResponse = self
            .post_json(
                "/read",
                &ReadRequest {
                    session,
                    tags,
                    group,
                    update,
                },
            )
            .await?;

        Ok(resp.rows)
    }

    async fn remove(&self, group: &str) -> Result<(), SourceError> {
        let session = self.session()?;
        self.post_ack("/remove", &GroupRequest { session, group })
            .await
    }

    async fn close(&mut self) -> Result<(), SourceError> {
        let Some(session) = self.session.take() else {
            return Ok(());
        };

        self.post_ack("/close", &CloseRequest { session: &session })
            .await
    }
}
