//! Action dispatch bridge — fires smart-action webhooks.
//!
//! Trigger events resolve their webhook from the record store at dispatch
//! time and fire as independent spawned tasks, so a slow or dead webhook
//! endpoint can never stall the relay loop. Policy: one retry after a fixed
//! backoff, then give up with a logged outcome.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::store::Store;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(2);
const MAX_ATTEMPTS: u32 = 2;

/// What happened to one trigger, surfaced to the logs.
#[derive(Debug)]
pub enum DispatchOutcome {
    Fired { status: u16, attempts: u32 },
    UnknownAction,
    LookupFailed { error: String },
    Failed { attempts: u32, last_error: String },
}

#[derive(Clone)]
pub struct ActionDispatcher {
    store: Store,
    http: reqwest::Client,
    retry_delay: Duration,
}

impl ActionDispatcher {
    pub fn new(store: Store) -> Self {
        Self {
            store,
            http: reqwest::Client::new(),
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    #[cfg(test)]
    fn with_retry_delay(store: Store, retry_delay: Duration) -> Self {
        Self {
            store,
            http: reqwest::Client::new(),
            retry_delay,
        }
    }

    /// Fire-and-forget dispatch. Returns immediately; the outcome is logged
    /// from the spawned task.
    pub fn spawn_dispatch(&self, action_id: String) {
        let dispatcher = self.clone();
        tokio::spawn(async move {
            let outcome = dispatcher.run(&action_id).await;
            match &outcome {
                DispatchOutcome::Fired { status, attempts } => {
                    info!(
                        component = "dispatch",
                        event = "dispatch.fired",
                        action_id = %action_id,
                        status = status,
                        attempts = attempts,
                        "Smart action webhook fired"
                    );
                }
                DispatchOutcome::UnknownAction => {
                    warn!(
                        component = "dispatch",
                        event = "dispatch.unknown_action",
                        action_id = %action_id,
                        "Trigger for unknown smart action dropped"
                    );
                }
                DispatchOutcome::LookupFailed { error } => {
                    warn!(
                        component = "dispatch",
                        event = "dispatch.lookup_failed",
                        action_id = %action_id,
                        error = %error,
                        "Smart action lookup failed"
                    );
                }
                DispatchOutcome::Failed {
                    attempts,
                    last_error,
                } => {
                    warn!(
                        component = "dispatch",
                        event = "dispatch.failed",
                        action_id = %action_id,
                        attempts = attempts,
                        error = %last_error,
                        "Smart action webhook failed"
                    );
                }
            }
        });
    }

    async fn run(&self, action_id: &str) -> DispatchOutcome {
        let action = match self.store.action(action_id).await {
            Ok(Some(action)) => action,
            Ok(None) => return DispatchOutcome::UnknownAction,
            Err(e) => {
                return DispatchOutcome::LookupFailed {
                    error: e.to_string(),
                }
            }
        };

        let mut last_error = String::new();
        for attempt in 1..=MAX_ATTEMPTS {
            match self.fire(&action.webhook).await {
                Ok(status) => {
                    return DispatchOutcome::Fired {
                        status,
                        attempts: attempt,
                    }
                }
                Err(e) => {
                    debug!(
                        component = "dispatch",
                        event = "dispatch.attempt_failed",
                        action_id = %action_id,
                        attempt = attempt,
                        error = %e,
                        "Webhook attempt failed"
                    );
                    last_error = e;
                }
            }
            if attempt < MAX_ATTEMPTS {
                tokio::time::sleep(self.retry_delay).await;
            }
        }

        DispatchOutcome::Failed {
            attempts: MAX_ATTEMPTS,
            last_error,
        }
    }

    async fn fire(&self, webhook: &str) -> Result<u16, String> {
        let response = self
            .http
            .get(webhook)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        let status = response.status();
        if status.is_success() {
            Ok(status.as_u16())
        } else {
            Err(format!("webhook returned {status}"))
        }
    }
}
