use crate::date::BatchDate;
use crate::error::TriggerError;
use crate::payload::JobSubmission;
use log::{debug, info, warn};
use reqwest::header::{CONTENT_TYPE, COOKIE, HeaderValue};
use reqwest::{Client as HttpClient, StatusCode};
use std::fmt;
use std::sync::Mutex;
use std::time::Duration;
use tokio_retry::RetryIf;
use tokio_retry::strategy::FixedInterval;

pub const DEFAULT_ENDPOINT: &str = "http://ene-apply-batch-orchestrator.prod.joveo.com/api/trigger";
const CREDENTIAL_COOKIE: &str = "CTK";

/// Timeouts and retry budget for a single trigger call.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub endpoint: String,
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    pub retries: u32,
    pub retry_delay: Duration,
    /// Ceiling across all attempts of one call, delays included.
    pub max_time: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            retries: 3,
            retry_delay: Duration::from_secs(5),
            max_time: Duration::from_secs(120),
        }
    }
}

/// What came of one trigger call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success {
        response_body: String,
    },
    /// The endpoint answered, but not with a 2xx.
    ApiError {
        status: StatusCode,
        response_body: String,
        diagnostic: String,
    },
    /// No answer at all.
    TransportError {
        message: String,
    },
}

impl Outcome {
    /// True only for a 2xx answer.
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success { .. })
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Success { .. } => f.write_str("success"),
            Outcome::ApiError {
                status, diagnostic, ..
            } => write!(f, "api error {status}: {diagnostic}"),
            Outcome::TransportError { message } => write!(f, "transport error: {message}"),
        }
    }
}

/// A failed attempt and whether another one is worth making.
struct Failure {
    outcome: Outcome,
    transient: bool,
}

#[derive(Debug, Clone)]
pub struct Client {
    http: HttpClient,
    config: TransportConfig,
}

impl Client {
    /// Create a client for the configured endpoint and transport budget.
    pub fn new(config: TransportConfig) -> Result<Self, TriggerError> {
        let http = HttpClient::builder()
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .build()?;

        info!("Initialized trigger client for {}", config.endpoint);
        Ok(Self { http, config })
    }

    /// Submit the batch job for `date`. Transient failures are retried
    /// within the configured budget; the last attempt decides the outcome.
    /// When `max_time` runs out mid-retry, the last failure seen is returned.
    pub async fn invoke(&self, date: BatchDate, credential: &str) -> Outcome {
        let submission = JobSubmission::for_date(date);
        let cookie = match HeaderValue::from_str(&format!("{CREDENTIAL_COOKIE}={credential}")) {
            Ok(mut value) => {
                value.set_sensitive(true);
                value
            }
            Err(_) => {
                return Outcome::TransportError {
                    message: "credential is not a valid header value".to_string(),
                };
            }
        };

        debug!(
            "POST {} job={} cookie={}=<redacted>",
            self.config.endpoint, submission.job_name, CREDENTIAL_COOKIE
        );

        // Last failed attempt, reported if the deadline fires.
        let last_failure = Mutex::new(None::<Outcome>);
        let (submission, cookie, last) = (&submission, &cookie, &last_failure);
        let strategy =
            FixedInterval::new(self.config.retry_delay).take(self.config.retries as usize);
        let attempts = RetryIf::spawn(
            strategy,
            move || async move {
                let result = self.attempt(submission, cookie).await;
                if let Err(failure) = &result {
                    warn!("Trigger attempt for {} failed: {}", date, failure.outcome);
                    if let Ok(mut slot) = last.lock() {
                        *slot = Some(failure.outcome.clone());
                    }
                }
                result
            },
            |failure: &Failure| failure.transient,
        );

        match tokio::time::timeout(self.config.max_time, attempts).await {
            Ok(Ok(response_body)) => Outcome::Success { response_body },
            Ok(Err(failure)) => failure.outcome,
            Err(_) => {
                let previous = last_failure.lock().ok().and_then(|mut slot| slot.take());
                warn!(
                    "Trigger call for {} exceeded {:?}",
                    date, self.config.max_time
                );
                previous.unwrap_or_else(|| Outcome::TransportError {
                    message: format!("gave up after {:?}", self.config.max_time),
                })
            }
        }
    }

    async fn attempt(
        &self,
        submission: &JobSubmission,
        cookie: &HeaderValue,
    ) -> Result<String, Failure> {
        let sent = self
            .http
            .post(&self.config.endpoint)
            .header(CONTENT_TYPE, "application/json")
            .header(COOKIE, cookie.clone())
            .json(submission)
            .send()
            .await;

        let response = match sent {
            Ok(response) => response,
            Err(err) => {
                return Err(Failure {
                    transient: is_transient_error(&err),
                    outcome: Outcome::TransportError {
                        message: err.to_string(),
                    },
                });
            }
        };

        let status = response.status();
        debug!("Received status {}", status);
        let response_body = match response.text().await {
            Ok(body) => body,
            Err(err) => {
                return Err(Failure {
                    transient: true,
                    outcome: Outcome::TransportError {
                        message: format!("failed to read response body: {err}"),
                    },
                });
            }
        };

        if status.is_success() {
            return Ok(response_body);
        }

        Err(Failure {
            transient: is_transient_status(status),
            outcome: Outcome::ApiError {
                status,
                diagnostic: describe_status(status),
                response_body,
            },
        })
    }
}

fn describe_status(status: StatusCode) -> String {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            "credential rejected, refresh the CTK cookie".to_string()
        }
        _ => status
            .canonical_reason()
            .unwrap_or("unexpected status")
            .to_string(),
    }
}

fn is_transient_status(status: StatusCode) -> bool {
    status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
}

fn is_transient_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}
