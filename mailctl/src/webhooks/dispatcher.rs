//! Fire-and-forget webhook delivery.
//!
//! ```text
//!   JobManager (terminal transition, job lock released)
//!     │
//!     ├─ WebhookSender::notify: serialize + sign, try_send
//!     │
//!     ▼
//!   bounded mpsc channel
//!     │
//!     ▼
//!   run_sender (spawned task):
//!     ├─ acquire semaphore permit
//!     └─ spawn HTTP POST, log + count outcome
//! ```
//!
//! Delivery is best effort: a full channel, a refused connection or a non-2xx response is logged
//! and counted, never retried, and never affects the job outcome.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::events::WebhookEvent;
use super::signing;
use crate::config::WebhookConfig;

/// A fully prepared request handed to the sender task.
#[derive(Debug)]
struct WebhookSendRequest {
    url: String,
    headers: Vec<(String, String)>,
    body: String,
    msg_id: String,
}

/// Handle used by the job manager to enqueue deliveries. Cheap to clone.
#[derive(Clone)]
pub struct WebhookSender {
    tx: mpsc::Sender<WebhookSendRequest>,
    signing_secret: Option<Arc<str>>,
}

impl WebhookSender {
    /// Create the sender and spawn the background delivery task.
    pub fn spawn(config: &WebhookConfig, shutdown: CancellationToken) -> anyhow::Result<(Self, JoinHandle<()>)> {
        let http_client = crate::crypto::http_client(Duration::from_secs(config.timeout_secs))?;
        let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
        let handle = tokio::spawn(run_sender(rx, http_client, config.max_concurrent_sends.max(1), shutdown));

        Ok((
            Self {
                tx,
                signing_secret: config.signing_secret.as_deref().map(Arc::from),
            },
            handle,
        ))
    }

    /// Queue a delivery of `event` to `url`. Never blocks.
    pub fn notify(&self, url: &str, event: &WebhookEvent) {
        let body = match serde_json::to_string(event) {
            Ok(body) => body,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize webhook event");
                return;
            }
        };

        let msg_id = format!("msg_{}", Uuid::new_v4().simple());
        let timestamp = event.timestamp.timestamp();
        let mut headers = vec![
            ("Content-Type".to_string(), "application/json".to_string()),
            ("webhook-id".to_string(), msg_id.clone()),
            ("webhook-timestamp".to_string(), timestamp.to_string()),
            ("webhook-version".to_string(), "1".to_string()),
        ];
        if let Some(secret) = &self.signing_secret {
            match signing::sign_payload(&msg_id, timestamp, &body, secret) {
                Some(signature) => headers.push(("webhook-signature".to_string(), signature)),
                None => tracing::warn!("Webhook signing secret is malformed, sending unsigned"),
            }
        }

        let request = WebhookSendRequest {
            url: url.to_string(),
            headers,
            body,
            msg_id,
        };
        if let Err(e) = self.tx.try_send(request) {
            tracing::warn!(
                url = %url,
                event_type = %event.event_type,
                "Dropping webhook delivery: {}",
                e
            );
            counter!("mailctl_webhook_deliveries_total", "outcome" => "dropped").increment(1);
        }
    }
}

/// Long-lived task that performs HTTP delivery.
async fn run_sender(
    mut rx: mpsc::Receiver<WebhookSendRequest>,
    http_client: reqwest::Client,
    max_concurrent_sends: usize,
    shutdown: CancellationToken,
) {
    let semaphore = Arc::new(Semaphore::new(max_concurrent_sends));

    loop {
        let request = tokio::select! {
            req = rx.recv() => {
                match req {
                    Some(r) => r,
                    None => {
                        tracing::debug!("Webhook sender channel closed, shutting down");
                        break;
                    }
                }
            }
            _ = shutdown.cancelled() => {
                tracing::debug!("Webhook sender received shutdown signal");
                break;
            }
        };

        let permit = match semaphore.clone().acquire_owned().await {
            Ok(p) => p,
            Err(_) => {
                tracing::warn!("Webhook sender semaphore closed");
                break;
            }
        };

        let client = http_client.clone();
        tokio::spawn(async move {
            let _permit = permit;

            let mut req_builder = client.post(&request.url);
            for (name, value) in &request.headers {
                req_builder = req_builder.header(name, value);
            }

            match req_builder.body(request.body).send().await {
                Ok(response) if response.status().is_success() => {
                    tracing::debug!(msg_id = %request.msg_id, url = %request.url, "Webhook delivered");
                    counter!("mailctl_webhook_deliveries_total", "outcome" => "success").increment(1);
                }
                Ok(response) => {
                    tracing::warn!(
                        msg_id = %request.msg_id,
                        url = %request.url,
                        status = response.status().as_u16(),
                        "Webhook endpoint returned an error status"
                    );
                    counter!("mailctl_webhook_deliveries_total", "outcome" => "failure").increment(1);
                }
                Err(e) => {
                    tracing::warn!(msg_id = %request.msg_id, url = %request.url, "Webhook delivery failed: {}", e);
                    counter!("mailctl_webhook_deliveries_total", "outcome" => "failure").increment(1);
                }
            }
        });
    }

    tracing::debug!("Webhook sender task exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::types::{Job, JobKind, JobStatus, VerdictCounts};
    use chrono::Utc;
    use wiremock::matchers::{header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn completed_job() -> Job {
        Job {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            kind: JobKind::Bulk,
            status: JobStatus::Completed,
            total_emails: 2,
            processed_emails: 2,
            counts: VerdictCounts {
                valid_count: 2,
                ..Default::default()
            },
            created_at: Utc::now(),
            started_at: Some(Utc::now()),
            completed_at: Some(Utc::now()),
            webhook_url: None,
            result_file: None,
            source_filename: None,
            error: None,
            credits_reserved: 2,
            credits_consumed: 2,
            credits_refunded: 0,
        }
    }

    fn config(secret: Option<String>) -> WebhookConfig {
        WebhookConfig {
            timeout_secs: 5,
            max_concurrent_sends: 4,
            channel_capacity: 10,
            signing_secret: secret,
        }
    }

    async fn wait_for_requests(server: &MockServer, n: usize) -> Vec<wiremock::Request> {
        for _ in 0..200 {
            let received = server.received_requests().await.unwrap_or_default();
            if received.len() >= n {
                return received;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        server.received_requests().await.unwrap_or_default()
    }

    #[tokio::test]
    async fn test_delivers_signed_event() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(header_exists("webhook-signature"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let secret = signing::generate_secret();
        let shutdown = CancellationToken::new();
        let (sender, _handle) = WebhookSender::spawn(&config(Some(secret.clone())), shutdown.clone()).unwrap();

        let event = WebhookEvent::job_terminal(&completed_job()).unwrap();
        sender.notify(&format!("{}/hook", server.uri()), &event);

        let received = wait_for_requests(&server, 1).await;
        assert_eq!(received.len(), 1);
        let request = &received[0];
        let msg_id = request.headers.get("webhook-id").unwrap().to_str().unwrap();
        let timestamp: i64 = request.headers.get("webhook-timestamp").unwrap().to_str().unwrap().parse().unwrap();
        let signature = request.headers.get("webhook-signature").unwrap().to_str().unwrap();
        let body = String::from_utf8(request.body.clone()).unwrap();
        assert!(signing::verify_signature(msg_id, timestamp, &body, signature, &secret));

        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["type"], "job.completed");

        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_unsigned_without_secret() {
        let server = MockServer::start().await;
        Mock::given(method("POST")).respond_with(ResponseTemplate::new(204)).mount(&server).await;

        let shutdown = CancellationToken::new();
        let (sender, _handle) = WebhookSender::spawn(&config(None), shutdown.clone()).unwrap();
        sender.notify(&server.uri(), &WebhookEvent::job_terminal(&completed_job()).unwrap());

        let received = wait_for_requests(&server, 1).await;
        assert_eq!(received.len(), 1);
        assert!(received[0].headers.get("webhook-signature").is_none());
        assert!(received[0].headers.get("webhook-id").is_some());

        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_failed_delivery_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let shutdown = CancellationToken::new();
        let (sender, _handle) = WebhookSender::spawn(&config(None), shutdown.clone()).unwrap();
        sender.notify(&server.uri(), &WebhookEvent::job_terminal(&completed_job()).unwrap());

        wait_for_requests(&server, 1).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(server.received_requests().await.unwrap().len(), 1);

        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_sender_stops_on_shutdown() {
        let shutdown = CancellationToken::new();
        let (_sender, handle) = WebhookSender::spawn(&config(None), shutdown.clone()).unwrap();
        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
    }
}
