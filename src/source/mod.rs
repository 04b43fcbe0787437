pub mod http;
pub mod resolve;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::config::SourceConfig;
use crate::value::RawValue;

/// Name of the batch group registered on the source for grouped reads.
///
/// A stale group of the same name (left over from a previous run against the
/// same server) is torn down before the group is re-created.
pub const BATCH_GROUP: &str = "opcbridge_batch";

/// Errors from the data-access source.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The gateway could not be reached or the request failed in transit.
    #[error("gateway request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The gateway answered with an error for this operation.
    #[error("gateway error: {0}")]
    Gateway(String),

    /// An operation was attempted before `connect` succeeded.
    #[error("not connected to a source server")]
    NotConnected,
}

/// One browse result entry.
///
/// Servers are inconsistent here: some return bare item identifiers, others
/// return multi-field records whose first field is the identifier. The
/// variant is normalized to a bare identifier at this boundary so the
/// resolver never branches on shape.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum BrowseItem {
    /// A bare item identifier.
    Identifier(String),
    /// A record; the identifier is the first field.
    Record(Vec<serde_json::Value>),
}

impl BrowseItem {
    /// The bare identifier, if this entry carries one.
    pub fn identifier(&self) -> Option<&str> {
        match self {
            BrowseItem::Identifier(s) => Some(s),
            BrowseItem::Record(fields) => fields.first().and_then(|v| v.as_str()),
        }
    }
}

/// One tag reading from a grouped batch read.
#[derive(Debug, Clone, Deserialize)]
pub struct Reading {
    /// Item identifier in the source namespace.
    pub tag: String,
    /// Raw value as reported by the server.
    pub value: RawValue,
    /// Source-reported quality string (e.g. "Good", "Bad").
    pub quality: String,
    /// Source-reported sample time.
    pub timestamp: DateTime<Utc>,
}

/// Client for an OPC DA style data-access source.
///
/// The vendor client library is a black box behind this trait; the engine
/// only depends on the five operations below.
pub trait SourceClient: Send {
    /// Connect to the named server, optionally on a remote host.
    fn connect(
        &mut self,
        server: &str,
        host: Option<&str>,
    ) -> impl std::future::Future<Output = Result<(), SourceError>> + Send;

    /// List namespace entries matching a browse pattern (e.g. `CH.*`).
    fn list(
        &self,
        pattern: &str,
    ) -> impl std::future::Future<Output = Result<Vec<BrowseItem>, SourceError>> + Send;

    /// Batch-read the given tags through a named group.
    ///
    /// `update` is the server-side update mode/interval; 0 reads current
    /// values on every call.
    fn read(
        &self,
        tags: &[String],
        group: &str,
        update: u32,
    ) -> impl std::future::Future<Output = Result<Vec<Reading>, SourceError>> + Send;

    /// Remove a named group from the server.
    fn remove(
        &self,
        group: &str,
    ) -> impl std::future::Future<Output = Result<(), SourceError>> + Send;

    /// Disconnect from the server.
    fn close(&mut self) -> impl std::future::Future<Output = Result<(), SourceError>> + Send;
}

/// Owns the connection to the upstream source and the named batch group.
pub struct SourceSession<C: SourceClient> {
    client: C,
    server: String,
    host: Option<String>,
    group: String,
}

impl<C: SourceClient> SourceSession<C> {
    /// Creates a session over an unconnected client.
    pub fn new(client: C, cfg: &SourceConfig) -> Self {
        Self {
            client,
            server: cfg.server.clone(),
            host: cfg.host.clone(),
            group: BATCH_GROUP.to_string(),
        }
    }

    /// Connects to the configured server.
    pub async fn connect(&mut self) -> Result<(), SourceError> {
        self.client
            .connect(&self.server, self.host.as_deref())
            .await
    }

    /// The underlying client, for namespace browsing.
    pub fn client(&self) -> &C {
        &self.client
    }

    /// Registers the batch group for the resolved tag set.
    ///
    /// Any stale group of the same name is removed first (best effort), then
    /// a priming read creates the group server-side.
    pub async fn prime(&mut self, tags: &[String]) -> Result<(), SourceError> {
        if let Err(e) = self.client.remove(&self.group).await {
            debug!(group = %self.group, error = %e, "no stale group to remove");
        }

        self.client.read(tags, &self.group, 0).await?;

        Ok(())
    }

    /// Performs one grouped batch read of all tags.
    pub async fn read_group(&self, tags: &[String]) -> Result<Vec<Reading>, SourceError> {
        self.client.read(tags, &self.group, 0).await
    }

    /// Tears down the old connection and establishes a fresh one, including
    /// the batch group.
    pub async fn reconnect(&mut self, tags: &[String]) -> Result<(), SourceError> {
        self.close_quietly().await;
        self.connect().await?;
        self.prime(tags).await?;
        Ok(())
    }

    /// Closes the session; errors are logged and swallowed so shutdown and
    /// reconnects always make progress.
    pub async fn close_quietly(&mut self) {
        if let Err(e) = self.client.close().await {
            debug!(error = %e, "source close failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_browse_item_identifier() {
        let id = BrowseItem::Identifier("CH.Dev1.Temp".to_string());
        assert_eq!(id.identifier(), Some("CH.Dev1.Temp"));
    }

    #[test]
    fn test_browse_record_takes_first_field() {
        let rec = BrowseItem::Record(vec![
            serde_json::json!("CH.Dev1.Temp"),
            serde_json::json!("Temp"),
        ]);
        assert_eq!(rec.identifier(), Some("CH.Dev1.Temp"));
    }

    #[test]
    fn test_browse_record_without_string_head_is_skipped() {
        let rec = BrowseItem::Record(vec![serde_json::json!(5)]);
        assert_eq!(rec.identifier(), None);

        let empty = BrowseItem::Record(Vec::new());
        assert_eq!(empty.identifier(), None);
    }

    #[test]
    fn test_browse_item_untagged_deserialization() {
        let items: Vec<BrowseItem> =
            serde_json::from_str(r#"["CH.A", ["CH.B", "B", 2], "CH.C"]"#).expect("parse");

        let ids: Vec<_> = items.iter().filter_map(BrowseItem::identifier).collect();
        assert_eq!(ids, vec!["CH.A", "CH.B", "CH.C"]);
    }

    #[test]
    fn test_reading_deserialization() {
        let reading: Reading = serde_json::from_str(
            r#"{
                "tag": "CH.Dev1.Temp",
                "value": 21.5,
                "quality": "Good",
                "timestamp": "2026-01-10T12:00:00Z"
            }"#,
        )
        .expect("parse");

        assert_eq!(reading.tag, "CH.Dev1.Temp");
        assert_eq!(reading.value, RawValue::Float(21.5));
        assert_eq!(reading.quality, "Good");
    }
}
