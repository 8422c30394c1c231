//! Built-in echo producer.
//!
//! Streams the query back word by word. Used to exercise the relay and the
//! CLI without a browser attached.

use std::time::Duration;

use tracing::debug;

use crate::driver::{ChunkSink, IncrementTracker, ResponseProducer};
use crate::error::ProducerError;

#[derive(Debug, Clone, Default)]
pub struct EchoProducer {
    /// Pause between words.
    word_delay: Duration,
}

impl EchoProducer {
    pub const fn new(word_delay: Duration) -> Self {
        Self { word_delay }
    }

    async fn echo(&self, query: &str, sink: &ChunkSink) -> Result<(), ProducerError> {
        if query.trim().is_empty() {
            return sink.error("Empty query").await;
        }

        sink.status("Echoing query").await?;

        // Build growing snapshots the way a page scraper would observe them.
        let mut tracker = IncrementTracker::new();
        let mut snapshot = String::with_capacity(query.len());
        for word in query.split_inclusive(' ') {
            if !self.word_delay.is_zero() {
                tokio::time::sleep(self.word_delay).await;
            }
            snapshot.push_str(word);
            if let Some(increment) = tracker.advance(&snapshot) {
                sink.chunk(increment).await?;
            }
        }

        debug!(echoed_bytes = tracker.sent().len(), "Echo complete");
        sink.finish("").await
    }
}

impl ResponseProducer for EchoProducer {
    async fn respond(&self, query: String, sink: ChunkSink) {
        if let Err(e) = self.echo(&query, &sink).await {
            debug!(error = %e, "Echo stopped early");
        }
    }
}
