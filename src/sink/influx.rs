use std::time::Duration;

use tracing::debug;

use crate::config::SinkConfig;

use super::{Point, SinkClient, SinkError};

/// InfluxDB v2 HTTP client.
///
/// Writes batches as line protocol to `/api/v2/write` with token auth.
pub struct InfluxClient {
    http: reqwest::Client,
    url: String,
    token: String,
    org: String,
    bucket: String,
}

impl InfluxClient {
    /// Creates a client from sink configuration.
    pub fn new(cfg: &SinkConfig) -> Result<Self, SinkError> {
        let timeout = if cfg.timeout.is_zero() {
            Duration::from_secs(10)
        } else {
            cfg.timeout
        };

        let http = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            http,
            url: cfg.url.trim_end_matches('/').to_string(),
            token: cfg.token.clone(),
            org: cfg.org.clone(),
            bucket: cfg.bucket.clone(),
        })
    }
}

impl SinkClient for InfluxClient {
    /// Pings `/health` so a bad URL or unreachable instance surfaces at
    /// startup instead of on the first flush.
    async fn connect(&self) -> Result<(), SinkError> {
        let url = format!("{}/health", self.url);

        let response = self.http.get(&url).send().await?;
        let status = response.status();

        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(SinkError::Rejected {
                status: status.as_u16(),
                detail,
            });
        }

        debug!(url = %self.url, "sink health check passed");

        Ok(())
    }

    async fn write(&self, points: &[Point]) -> Result<(), SinkError> {
        let body = points
            .iter()
            .map(Point::to_line_protocol)
            .collect::<Vec<_>>()
            .join("\n");

        let url = format!("{}/api/v2/write", self.url);

        let response = self
            .http
            .post(&url)
            .query(&[
                ("org", self.org.as_str()),
                ("bucket", self.bucket.as_str()),
                ("precision", "ns"),
            ])
            .header("Authorization", format!("Token {}", self.token))
            .header("Content-Type", "text/plain; charset=utf-8")
            .body(body)
            .send()
            .await?;

        let status = response.status();

        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(SinkError::Rejected {
                status: status.as_u16(),
                detail,
            });
        }

        Ok(())
    }

    async fn close(&mut self) -> Result<(), SinkError> {
        // Connections are pooled; dropping the client releases them.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> SinkConfig {
        SinkConfig {
            url: "http://localhost:8086/".to_string(),
            token: "t0ken".to_string(),
            org: "plant".to_string(),
            bucket: "boiler".to_string(),
            timeout: Duration::from_secs(1),
        }
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let client = InfluxClient::new(&test_config()).expect("client");
        assert_eq!(client.url, "http://localhost:8086");
    }

    #[test]
    fn test_zero_timeout_falls_back_to_default() {
        let mut cfg = test_config();
        cfg.timeout = Duration::ZERO;
        InfluxClient::new(&cfg).expect("client builds with default timeout");
    }
}
