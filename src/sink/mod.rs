pub mod buffer;
pub mod influx;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors from the time-series sink.
#[derive(Debug, Error)]
pub enum SinkError {
    /// The sink could not be reached or the request failed in transit.
    #[error("sink request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The sink rejected the write.
    #[error("sink rejected write with status {status}: {detail}")]
    Rejected { status: u16, detail: String },
}

/// One sample ready for the sink. Immutable once constructed.
#[derive(Debug, Clone)]
pub struct Point {
    measurement: String,
    tags: Vec<(String, String)>,
    value: f64,
    quality_good: bool,
    timestamp: DateTime<Utc>,
}

impl Point {
    /// Creates a point with no tags.
    pub fn new(measurement: &str, value: f64, quality_good: bool, timestamp: DateTime<Utc>) -> Self {
        Self {
            measurement: measurement.to_string(),
            tags: Vec::new(),
            value,
            quality_good,
            timestamp,
        }
    }

    /// Attaches a tag key/value pair.
    pub fn with_tag(mut self, key: &str, value: &str) -> Self {
        self.tags.push((key.to_string(), value.to_string()));
        self
    }

    /// The numeric value field.
    pub fn value(&self) -> f64 {
        self.value
    }

    /// The value of a tag, if present.
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Renders the point in InfluxDB v2 line protocol:
    ///
    /// ```text
    /// measurement,tag1=v1,tag2=v2 value=21.5,quality=1i timestamp_ns
    /// ```
    ///
    /// Tags are sorted by key for canonical form. The quality field is the
    /// binary good/bad mapping, written as an integer.
    pub fn to_line_protocol(&self) -> String {
        let mut line = escape_measurement(&self.measurement);

        let mut tags: Vec<_> = self.tags.iter().collect();
        tags.sort_by(|a, b| a.0.cmp(&b.0));
        for (key, value) in tags {
            line.push(',');
            line.push_str(&escape_tag(key));
            line.push('=');
            line.push_str(&escape_tag(value));
        }

        line.push_str(" value=");
        line.push_str(&self.value.to_string());
        line.push_str(",quality=");
        line.push_str(if self.quality_good { "1i" } else { "0i" });

        line.push(' ');
        line.push_str(
            &self
                .timestamp
                .timestamp_nanos_opt()
                .unwrap_or_default()
                .to_string(),
        );

        line
    }
}

/// Escape a measurement name: commas and spaces.
fn escape_measurement(s: &str) -> String {
    s.replace(',', "\\,").replace(' ', "\\ ")
}

/// Escape a tag key or value: commas, equals signs and spaces.
fn escape_tag(s: &str) -> String {
    s.replace(',', "\\,")
        .replace('=', "\\=")
        .replace(' ', "\\ ")
}

/// Client for a time-series sink.
///
/// The vendor client library is a black box behind this trait.
pub trait SinkClient: Send {
    /// Verify connectivity to the sink.
    fn connect(&self) -> impl std::future::Future<Output = Result<(), SinkError>> + Send;

    /// Bulk-write a batch of points. All-or-nothing from the caller's point
    /// of view: an error means the whole batch is treated as unwritten.
    fn write(
        &self,
        points: &[Point],
    ) -> impl std::future::Future<Output = Result<(), SinkError>> + Send;

    /// Release the sink session.
    fn close(&mut self) -> impl std::future::Future<Output = Result<(), SinkError>> + Send;
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn ts() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 500).single().expect("valid")
    }

    #[test]
    fn test_line_protocol_plain() {
        let point = Point::new("boiler", 21.5, true, ts());
        assert_eq!(
            point.to_line_protocol(),
            "boiler value=21.5,quality=1i 1700000000000000500",
        );
    }

    #[test]
    fn test_line_protocol_tags_sorted_by_key() {
        let point = Point::new("boiler", 5.0, false, ts())
            .with_tag("source", "KepwareDA")
            .with_tag("item", "CH.Dev1.Temp");

        assert_eq!(
            point.to_line_protocol(),
            "boiler,item=CH.Dev1.Temp,source=KepwareDA value=5,quality=0i 1700000000000000500",
        );
    }

    #[test]
    fn test_line_protocol_escapes_special_characters() {
        let point = Point::new("my measurement", 1.0, true, ts())
            .with_tag("item", "CH.Dev 1,A=B");

        assert_eq!(
            point.to_line_protocol(),
            "my\\ measurement,item=CH.Dev\\ 1\\,A\\=B value=1,quality=1i 1700000000000000500",
        );
    }

    #[test]
    fn test_tag_lookup() {
        let point = Point::new("m", 0.0, true, ts()).with_tag("machine", "Dev01");
        assert_eq!(point.tag("machine"), Some("Dev01"));
        assert_eq!(point.tag("missing"), None);
    }
}
