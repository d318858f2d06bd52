pub mod loki;

pub use loki::LokiClient;

use async_trait::async_trait;
use std::collections::HashMap;

/// One delivery value: `(timestamp_ns, line, metadata)`.
pub type SinkValue = (String, String, HashMap<String, String>);

/// Delivery boundary for batches of structured entries. Transport failures
/// never propagate past this interface; they are logged and reported as
/// `false` so the monitor can retain the batch.
#[async_trait]
pub trait LogSink: Send + Sync {
    async fn send(
        &self,
        app_name: &str,
        service_name: &str,
        values: Vec<SinkValue>,
        extra_labels: Option<HashMap<String, String>>,
    ) -> bool;
}
