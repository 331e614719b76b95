//! Job bridge: turns a `job` request into an asynchronous scrape whose result
//! is pushed to the receiver client and reported back to the requester.
//!
//! Each dispatch spawns an independent task. Jobs share nothing but the
//! connection registry, and neither deduplicate nor cancel one another.

pub mod scraper;

use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

use crate::ws::broadcast::send_to;
use crate::ws::envelope::{now_millis, Envelope, MessageKind};
use crate::ws::{ClientId, ConnectionRegistry};
use scraper::{ProfileScraper, ScrapeError};

/// Name of the job announced in the start acknowledgement.
pub const FOLLOWERS_JOB: &str = "followers";

#[derive(Debug, Clone)]
pub struct JobSettings {
    /// Client that receives every job result.
    pub receiver_id: ClientId,
    /// Upper bound on a single scrape.
    pub timeout: Duration,
    /// Used when a request carries no username; such requests are rejected when unset.
    pub default_username: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error(transparent)]
    Scrape(#[from] ScrapeError),
    #[error("scrape timed out after {}s", .0.as_secs())]
    Timeout(Duration),
    #[error("no follower count in scrape result")]
    MissingFollowers,
}

/// A scrape in flight.
#[derive(Debug, Clone)]
struct Job {
    username: String,
    requester: ClientId,
    started_at: Instant,
}

#[derive(Clone)]
pub struct JobBridge {
    registry: ConnectionRegistry,
    scraper: Arc<dyn ProfileScraper>,
    settings: Arc<JobSettings>,
}

impl JobBridge {
    pub fn new(
        registry: ConnectionRegistry,
        scraper: Arc<dyn ProfileScraper>,
        settings: JobSettings,
    ) -> Self {
        Self {
            registry,
            scraper,
            settings: Arc::new(settings),
        }
    }

    pub fn receiver_id(&self) -> &ClientId {
        &self.settings.receiver_id
    }

    /// Start a followers job for `requester`.
    ///
    /// The requester is acknowledged before the scrape begins. Returns the
    /// spawned task, or `None` if the request was rejected for lack of a
    /// username.
    pub fn dispatch(&self, requester: ClientId, payload: Option<&Value>) -> Option<JoinHandle<()>> {
        let Some(username) = self.resolve_username(payload) else {
            tracing::debug!(requester = %requester, "Job request without username rejected");
            self.notify(
                &requester,
                Envelope::server(
                    MessageKind::Error,
                    json!({ "message": "job payload is missing a username" }),
                ),
            );
            return None;
        };

        self.notify(
            &requester,
            Envelope::server(
                MessageKind::Ack,
                json!({ "started": true, "job": FOLLOWERS_JOB, "username": username }),
            ),
        );

        tracing::info!(requester = %requester, username = %username, "Job started");

        let job = Job {
            username,
            requester,
            started_at: Instant::now(),
        };
        let bridge = self.clone();
        Some(tokio::spawn(async move { bridge.run(job).await }))
    }

    fn resolve_username(&self, payload: Option<&Value>) -> Option<String> {
        payload
            .and_then(|p| p.get("username"))
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .or_else(|| {
                self.settings
                    .default_username
                    .as_deref()
                    .map(str::trim)
                    .filter(|name| !name.is_empty())
                    .map(str::to_string)
            })
    }

    async fn run(&self, job: Job) {
        match self.fetch_followers(&job.username).await {
            Ok(followers) => self.deliver_success(&job, followers),
            Err(e) => self.deliver_failure(&job, &e),
        }
    }

    async fn fetch_followers(&self, username: &str) -> Result<u64, JobError> {
        let result = tokio::time::timeout(self.settings.timeout, self.scraper.scrape(username))
            .await
            .map_err(|_| JobError::Timeout(self.settings.timeout))??;
        result.followers().ok_or(JobError::MissingFollowers)
    }

    fn deliver_success(&self, job: &Job, followers: u64) {
        let duration_ms = job.started_at.elapsed().as_millis() as u64;
        let receiver = &self.settings.receiver_id;

        let result = Envelope::server(
            MessageKind::Followers,
            json!({
                "username": job.username,
                "followers": followers,
                "ts": now_millis(),
                "durationMs": duration_ms,
            }),
        );
        let delivered = match send_to(&self.registry, receiver, &result) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(receiver = %receiver, error = %e, "Job result not delivered to receiver");
                false
            }
        };

        tracing::info!(
            requester = %job.requester,
            username = %job.username,
            followers = followers,
            duration_ms = duration_ms,
            delivered_to_receiver = delivered,
            "Job finished"
        );

        self.notify(
            &job.requester,
            Envelope::server(
                MessageKind::Done,
                json!({
                    "username": job.username,
                    "followers": followers,
                    "deliveredToReceiver": delivered,
                }),
            ),
        );

        if !delivered {
            self.notify(
                &job.requester,
                Envelope::server(
                    MessageKind::Warn,
                    json!({
                        "username": job.username,
                        "message": format!("receiver '{}' is not connected; result was not delivered", receiver),
                    }),
                ),
            );
        }
    }

    fn deliver_failure(&self, job: &Job, error: &JobError) {
        tracing::warn!(
            requester = %job.requester,
            username = %job.username,
            error = %error,
            "Job failed"
        );

        let payload = json!({ "username": job.username, "message": error.to_string() });
        self.notify(
            &job.requester,
            Envelope::server(MessageKind::Error, payload.clone()),
        );
        self.notify(
            &self.settings.receiver_id,
            Envelope::server(MessageKind::JobError, payload),
        );
    }

    /// Best-effort delivery; a missing client is only logged.
    fn notify(&self, client_id: &ClientId, envelope: Envelope) -> bool {
        match send_to(&self.registry, client_id, &envelope) {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(
                    client_id = %client_id,
                    kind = %envelope.kind,
                    error = %e,
                    "Job notification dropped"
                );
                false
            }
        }
    }
}
