use super::{Point, SinkClient, SinkError};

/// Pending point queue with best-effort delivery.
///
/// Points accumulate across cycles and leave the buffer only when a bulk
/// write was acknowledged by the sink. A failed flush leaves the buffer
/// untouched, so the same points (plus anything enqueued since) go out on
/// the next attempt. There is no partial acknowledgement: if the sink
/// persisted a subset before failing, the retry may duplicate those points.
/// That is the documented at-least-once trade-off.
///
/// Growth is unbounded; the caller watches the backlog size.
pub struct WriteBuffer {
    pending: Vec<Point>,
}

impl WriteBuffer {
    /// Creates an empty buffer.
    pub fn new() -> Self {
        Self {
            pending: Vec::new(),
        }
    }

    /// Appends points to the pending queue. No delivery is attempted.
    pub fn enqueue(&mut self, points: Vec<Point>) {
        self.pending.extend(points);
    }

    /// Number of points awaiting delivery.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Attempts a single bulk write of the entire pending queue.
    ///
    /// An empty queue is a success no-op without touching the sink. On
    /// success the queue is cleared and the number of delivered points is
    /// returned; on error the queue is left as-is.
    pub async fn flush<S: SinkClient>(&mut self, sink: &S) -> Result<usize, SinkError> {
        if self.pending.is_empty() {
            return Ok(0);
        }

        sink.write(&self.pending).await?;

        let written = self.pending.len();
        self.pending.clear();

        Ok(written)
    }
}

impl Default for WriteBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use chrono::Utc;

    use super::*;

    /// Sink fake that records write attempts and fails on demand.
    struct FakeSink {
        fail_next: Mutex<u32>,
        writes: Mutex<Vec<Vec<String>>>,
    }

    impl FakeSink {
        fn new(fail_next: u32) -> Self {
            Self {
                fail_next: Mutex::new(fail_next),
                writes: Mutex::new(Vec::new()),
            }
        }

        fn write_count(&self) -> usize {
            self.writes.lock().expect("lock").len()
        }

        fn last_write(&self) -> Vec<String> {
            self.writes
                .lock()
                .expect("lock")
                .last()
                .cloned()
                .unwrap_or_default()
        }
    }

    impl SinkClient for FakeSink {
        async fn connect(&self) -> Result<(), SinkError> {
            Ok(())
        }

        async fn write(&self, points: &[Point]) -> Result<(), SinkError> {
            let mut fail = self.fail_next.lock().expect("lock");
            if *fail > 0 {
                *fail -= 1;
                return Err(SinkError::Rejected {
                    status: 503,
                    detail: "unavailable".to_string(),
                });
            }

            let items: Vec<String> = points
                .iter()
                .map(|p| p.tag("item").unwrap_or_default().to_string())
                .collect();
            self.writes.lock().expect("lock").push(items);

            Ok(())
        }

        async fn close(&mut self) -> Result<(), SinkError> {
            Ok(())
        }
    }

    fn point(item: &str) -> Point {
        Point::new("m", 1.0, true, Utc::now()).with_tag("item", item)
    }

    #[tokio::test]
    async fn test_empty_flush_is_noop_without_sink_call() {
        let sink = FakeSink::new(0);
        let mut buffer = WriteBuffer::new();

        let written = buffer.flush(&sink).await.expect("flush");
        assert_eq!(written, 0);
        assert_eq!(sink.write_count(), 0);
    }

    #[tokio::test]
    async fn test_successful_flush_clears_pending() {
        let sink = FakeSink::new(0);
        let mut buffer = WriteBuffer::new();

        buffer.enqueue(vec![point("A"), point("B")]);
        assert_eq!(buffer.pending(), 2);

        let written = buffer.flush(&sink).await.expect("flush");
        assert_eq!(written, 2);
        assert_eq!(buffer.pending(), 0);
        assert_eq!(sink.last_write(), vec!["A", "B"]);
    }

    #[tokio::test]
    async fn test_failed_flush_retains_points() {
        let sink = FakeSink::new(1);
        let mut buffer = WriteBuffer::new();

        buffer.enqueue(vec![point("A")]);
        buffer.flush(&sink).await.expect_err("sink down");
        assert_eq!(buffer.pending(), 1);
    }

    #[tokio::test]
    async fn test_failed_flushes_accumulate_in_enqueue_order() {
        let sink = FakeSink::new(3);
        let mut buffer = WriteBuffer::new();

        // Three cycles against a dead sink.
        for cycle in 0..3 {
            buffer.enqueue(vec![point(&format!("C{cycle}"))]);
            buffer.flush(&sink).await.expect_err("sink down");
        }
        assert_eq!(buffer.pending(), 3);

        // Sink recovers; the union goes out in original enqueue order.
        buffer.enqueue(vec![point("C3")]);
        let written = buffer.flush(&sink).await.expect("flush");
        assert_eq!(written, 4);
        assert_eq!(buffer.pending(), 0);
        assert_eq!(sink.last_write(), vec!["C0", "C1", "C2", "C3"]);
    }
}
