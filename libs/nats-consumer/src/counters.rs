//! Process-wide message counters.
//!
//! Owned by the lifecycle controller and shared by `Arc` with every
//! subscription loop and the stats reporter. All counters only ever grow.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct Counters {
    received: AtomicU64,
    processed: AtomicU64,
    decode_failures: AtomicU64,
}

impl Counters {
    pub fn new() -> Self {
        Self::default()
    }

    /// A message arrived on any subscription.
    pub fn record_received(&self) -> u64 {
        self.received.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// A message was decoded and handed to the sink.
    pub fn record_processed(&self) -> u64 {
        self.processed.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn record_decode_failure(&self) -> u64 {
        self.decode_failures.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn received(&self) -> u64 {
        self.received.load(Ordering::SeqCst)
    }

    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::SeqCst)
    }

    pub fn decode_failures(&self) -> u64 {
        self.decode_failures.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn test_counters_increment() {
        let c = Counters::new();
        assert_eq!(c.record_received(), 1);
        assert_eq!(c.record_received(), 2);
        assert_eq!(c.record_processed(), 1);
        assert_eq!(c.record_decode_failure(), 1);
        assert_eq!((c.received(), c.processed(), c.decode_failures()), (2, 1, 1));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_counters_concurrent() {
        let c = Arc::new(Counters::new());
        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let c = Arc::clone(&c);
                tokio::spawn(async move {
                    for _ in 0..1000 {
                        c.record_received();
                    }
                })
            })
            .collect();
        for t in tasks {
            t.await.unwrap();
        }
        assert_eq!(c.received(), 8000);
    }
}
