//! Alert fan-out sinks. A sink failure never blocks the bus (spec §4.4).

use crate::models::Alert;

pub trait AlertSink: Send + Sync {
    fn name(&self) -> &'static str;
    fn emit(&self, alert: &Alert) -> anyhow::Result<()>;
}

/// Structured log line per alert; always available, never fails.
pub struct LogSink;

impl AlertSink for LogSink {
    fn name(&self) -> &'static str {
        "log"
    }

    fn emit(&self, alert: &Alert) -> anyhow::Result<()> {
        tracing::warn!(
            alert_id = %alert.id,
            severity = ?alert.severity,
            kind = ?alert.kind,
            model = %alert.subject.model,
            spectrum = %alert.subject.spectrum,
            measured_value = alert.measured_value,
            threshold = alert.threshold,
            count = alert.count,
            "alert"
        );
        Ok(())
    }
}

/// Posts the alert as JSON to a configured webhook URL.
pub struct WebhookSink {
    url: String,
    client: reqwest::Client,
}

impl WebhookSink {
    pub fn new(url: String) -> Self {
        Self {
            url,
            client: reqwest::Client::new(),
        }
    }
}

impl AlertSink for WebhookSink {
    fn name(&self) -> &'static str {
        "webhook"
    }

    fn emit(&self, alert: &Alert) -> anyhow::Result<()> {
        let client = self.client.clone();
        let url = self.url.clone();
        let body = serde_json::to_value(alert)?;
        tokio::spawn(async move {
            if let Err(e) = client.post(&url).json(&body).send().await {
                tracing::warn!(error = %e, "webhook alert delivery failed");
            }
        });
        Ok(())
    }
}
