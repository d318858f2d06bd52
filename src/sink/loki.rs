use super::{LogSink, SinkValue};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, error, info};

pub const DEFAULT_LOKI_URL: &str = "http://grafana-loki:3100/loki/api/v1/push";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize)]
struct PushRequest {
    streams: Vec<Stream>,
}

#[derive(Debug, Serialize)]
struct Stream {
    stream: HashMap<String, String>,
    values: Vec<SinkValue>,
}

/// Client for the Loki push API. Labels on every stream are
/// `{app, service}` merged with whatever extra labels the monitor supplies.
pub struct LokiClient {
    url: String,
    client: reqwest::Client,
}

impl LokiClient {
    pub fn new(url: impl Into<String>) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        let url = url.into();
        info!(url = %url, "Loki client initialized");
        Ok(Self { url, client })
    }

    fn build_request(
        app_name: &str,
        service_name: &str,
        values: Vec<SinkValue>,
        extra_labels: Option<HashMap<String, String>>,
    ) -> PushRequest {
        let mut labels = HashMap::from([
            ("app".to_string(), app_name.to_string()),
            ("service".to_string(), service_name.to_string()),
        ]);
        if let Some(extra) = extra_labels {
            labels.extend(extra);
        }

        PushRequest {
            streams: vec![Stream {
                stream: labels,
                values,
            }],
        }
    }
}

#[async_trait]
impl LogSink for LokiClient {
    async fn send(
        &self,
        app_name: &str,
        service_name: &str,
        values: Vec<SinkValue>,
        extra_labels: Option<HashMap<String, String>>,
    ) -> bool {
        if values.is_empty() {
            return true;
        }

        let count = values.len();
        let request = Self::build_request(app_name, service_name, values, extra_labels);

        let response = match self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                error!(app = app_name, service = service_name, error = %e, "Failed to send logs to Loki");
                return false;
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(
                app = app_name,
                service = service_name,
                status = %status,
                body = %body,
                "Loki push rejected"
            );
            return false;
        }

        debug!(app = app_name, service = service_name, entries = count, "Pushed entries to Loki");
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn value(ts: &str, line: &str, level: &str) -> SinkValue {
        (
            ts.to_string(),
            line.to_string(),
            HashMap::from([("level".to_string(), level.to_string())]),
        )
    }

    #[test]
    fn test_request_shape() {
        let request = LokiClient::build_request(
            "myapp",
            "web",
            vec![value("1704103200123000000", "hello", "info")],
            None,
        );

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(
            json["streams"][0]["stream"],
            serde_json::json!({"app": "myapp", "service": "web"})
        );
        assert_eq!(
            json["streams"][0]["values"][0],
            serde_json::json!(["1704103200123000000", "hello", {"level": "info"}])
        );
    }

    #[test]
    fn test_extra_labels_merged() {
        let request = LokiClient::build_request(
            "myapp",
            "worker",
            vec![value("1", "x", "unknown")],
            Some(HashMap::from([(
                "container".to_string(),
                "worker-1".to_string(),
            )])),
        );

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(
            json["streams"][0]["stream"],
            serde_json::json!({"app": "myapp", "service": "worker", "container": "worker-1"})
        );
    }

    #[test]
    fn test_client_builds_for_default_url() {
        assert!(LokiClient::new(DEFAULT_LOKI_URL).is_ok());
    }

    #[tokio::test]
    async fn test_unreachable_sink_reports_false() {
        let client = LokiClient::new("http://127.0.0.1:9/loki/api/v1/push").unwrap();
        let sent = client
            .send("app", "svc", vec![value("1", "x", "info")], None)
            .await;
        assert!(!sent);
    }

    #[tokio::test]
    async fn test_empty_batch_is_trivially_sent() {
        let client = LokiClient::new("http://127.0.0.1:9/loki/api/v1/push").unwrap();
        assert!(client.send("app", "svc", Vec::new(), None).await);
    }
}
