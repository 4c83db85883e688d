//! Decodes raw payloads and forwards them to the sink.

use std::sync::Arc;

use serde_json::Value;
use tracing::{error, trace};

use crate::counters::Counters;
use crate::error::DecodeError;
use crate::sink::Sink;

/// Turns raw message bytes into JSON values for the configured [`Sink`].
#[derive(Clone)]
pub struct MessageHandler {
    counters: Arc<Counters>,
    sink: Arc<dyn Sink>,
}

impl MessageHandler {
    pub fn new(counters: Arc<Counters>, sink: Arc<dyn Sink>) -> Self {
        Self { counters, sink }
    }

    pub fn counters(&self) -> &Arc<Counters> {
        &self.counters
    }

    /// Decode `raw` as UTF-8 JSON and hand it to the sink.
    ///
    /// Undecodable payloads are dropped and reported as [`DecodeError`]; they
    /// never reach the sink and are not counted as processed. Sink failures
    /// are logged here and do not fail the call.
    pub fn handle(&self, stream: &str, raw: &[u8]) -> Result<(), DecodeError> {
        let value = decode(raw).inspect_err(|_| {
            self.counters.record_decode_failure();
        })?;

        if let Err(err) = self.sink.emit(stream, &value) {
            error!(stream, error = %err, "sink failed to write message");
        }
        let processed = self.counters.record_processed();
        trace!(stream, processed, "message processed");
        Ok(())
    }
}

impl std::fmt::Debug for MessageHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageHandler")
            .field("counters", &self.counters)
            .finish_non_exhaustive()
    }
}

/// UTF-8 then JSON.
pub fn decode(raw: &[u8]) -> Result<Value, DecodeError> {
    let text = std::str::from_utf8(raw).map_err(|e| DecodeError::InvalidJson {
        len: raw.len(),
        reason: format!("invalid utf-8: {e}"),
    })?;
    serde_json::from_str(text).map_err(|e| DecodeError::InvalidJson {
        len: raw.len(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;
    use serde_json::json;
    use tracing_test::traced_test;

    use super::*;
    use crate::error::SinkError;

    #[derive(Default)]
    struct RecordingSink {
        seen: Mutex<Vec<(String, Value)>>,
        fail: bool,
    }

    impl Sink for RecordingSink {
        fn emit(&self, stream: &str, value: &Value) -> Result<(), SinkError> {
            self.seen.lock().push((stream.to_owned(), value.clone()));
            if self.fail {
                return Err(SinkError::Closed);
            }
            Ok(())
        }

        fn close(&self) {}
    }

    fn handler(sink: Arc<RecordingSink>) -> (MessageHandler, Arc<Counters>) {
        let counters = Arc::new(Counters::new());
        (MessageHandler::new(Arc::clone(&counters), sink), counters)
    }

    #[test]
    fn test_valid_json_reaches_sink_once() {
        let sink = Arc::new(RecordingSink::default());
        let (h, counters) = handler(Arc::clone(&sink));
        h.handle("pumpfun", br#"{"a":1}"#).unwrap();
        assert_eq!(counters.processed(), 1);
        assert_eq!(
            *sink.seen.lock(),
            vec![("pumpfun".to_owned(), json!({"a": 1}))]
        );
    }

    #[test]
    fn test_invalid_payloads_are_rejected() {
        let sink = Arc::new(RecordingSink::default());
        let (h, counters) = handler(Arc::clone(&sink));
        for raw in [&b"not-json"[..], &[0xff, 0xfe, b'{'][..], &b""[..]] {
            assert!(matches!(
                h.handle("pumpfun", raw),
                Err(DecodeError::InvalidJson { .. })
            ));
        }
        assert_eq!(counters.processed(), 0);
        assert_eq!(counters.decode_failures(), 3);
        assert!(sink.seen.lock().is_empty());
    }

    #[test]
    fn test_mixed_sequence() {
        let sink = Arc::new(RecordingSink::default());
        let (h, counters) = handler(Arc::clone(&sink));
        let msgs: [&[u8]; 5] = [b"1", b"{", b"[true]", b"\"s\"", b"{\"x\":"];
        let ok = msgs.iter().filter(|m| h.handle("s", m).is_ok()).count();
        assert_eq!(ok, 3);
        assert_eq!(counters.processed(), 3);
        assert_eq!(sink.seen.lock().len(), 3);
    }

    #[test]
    #[traced_test]
    fn test_sink_failure_does_not_fail_decode() {
        let sink = Arc::new(RecordingSink {
            fail: true,
            ..Default::default()
        });
        let (h, counters) = handler(sink);
        assert!(h.handle("pumpfun", b"{}").is_ok());
        assert_eq!(counters.processed(), 1);
        assert!(logs_contain("sink failed to write message"));
    }
}
