//! Directory query adapter — presence cards and chat relay.
//!
//! Office cards need two sequential dependent lookups (profile, then
//! presence) against the external directory API. Both run in a spawned task
//! that enqueues the aggregated card back onto the coordinator queue, so a
//! slow directory never stalls the relay. Duplicate requests for a
//! (robot, user) pair coalesce onto the in-flight lookup, and completed
//! cards are served from a short-TTL cache — the AR overlay re-requests on
//! every render.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use futures::future::BoxFuture;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use roverlink_protocol::{OfficeCard, Presence};

use crate::coordinator::CoordinatorEvent;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("directory request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("directory returned status {0}")]
    Status(u16),
    #[error("no directory token configured")]
    MissingToken,
}

/// Profile fields the card needs.
#[derive(Debug, Clone)]
pub struct UserProfile {
    pub display_name: String,
}

/// Seam to the external directory. The HTTP implementation talks to the
/// Graph-style API; tests substitute a counting mock.
pub trait DirectoryApi: Send + Sync + 'static {
    fn profile<'a>(&'a self, user_id: &'a str)
        -> BoxFuture<'a, Result<UserProfile, DirectoryError>>;
    fn presence<'a>(&'a self, user_id: &'a str) -> BoxFuture<'a, Result<String, DirectoryError>>;
    fn send_chat<'a>(
        &'a self,
        chat_id: &'a str,
        message: &'a str,
    ) -> BoxFuture<'a, Result<(), DirectoryError>>;
}

type CardKey = (String, String);

#[derive(Clone)]
pub struct DirectoryAdapter {
    api: Arc<dyn DirectoryApi>,
    events: mpsc::Sender<CoordinatorEvent>,
    pending: Arc<DashMap<CardKey, ()>>,
    cache: Arc<DashMap<CardKey, (OfficeCard, Instant)>>,
    cache_ttl: Duration,
}

impl DirectoryAdapter {
    pub fn new(api: Arc<dyn DirectoryApi>, events: mpsc::Sender<CoordinatorEvent>) -> Self {
        Self {
            api,
            events,
            pending: Arc::new(DashMap::new()),
            cache: Arc::new(DashMap::new()),
            cache_ttl: DEFAULT_CACHE_TTL,
        }
    }

    #[cfg(test)]
    fn with_cache_ttl(
        api: Arc<dyn DirectoryApi>,
        events: mpsc::Sender<CoordinatorEvent>,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            cache_ttl,
            ..Self::new(api, events)
        }
    }

    /// Request the office card for (robot, user). Non-blocking: the card
    /// arrives later as a coordinator event. Duplicate requests while a
    /// lookup is in flight are absorbed — all session members receive the
    /// single resulting broadcast.
    pub fn request_card(&self, robot_id: String, user_id: String) {
        let key = (robot_id.clone(), user_id.clone());

        if let Some(entry) = self.cache.get(&key) {
            let (card, stored_at) = entry.value().clone();
            if stored_at.elapsed() < self.cache_ttl {
                debug!(
                    component = "directory",
                    event = "directory.card_cached",
                    robot_id = %robot_id,
                    user_id = %user_id,
                    "Serving office card from cache"
                );
                let events = self.events.clone();
                tokio::spawn(async move {
                    let _ = events.send(CoordinatorEvent::OfficeCardReady { card }).await;
                });
                return;
            }
            drop(entry);
            self.cache.remove(&key);
        }

        if self.pending.insert(key.clone(), ()).is_some() {
            debug!(
                component = "directory",
                event = "directory.card_coalesced",
                robot_id = %robot_id,
                user_id = %user_id,
                "Office card lookup already in flight"
            );
            return;
        }

        let adapter = self.clone();
        tokio::spawn(async move {
            let card = adapter.build_card(&robot_id, &user_id).await;
            adapter.pending.remove(&key);
            adapter.cache.insert(key, (card.clone(), Instant::now()));
            let _ = adapter
                .events
                .send(CoordinatorEvent::OfficeCardReady { card })
                .await;
        });
    }

    /// Sequential pipeline: profile → presence → aggregate. Failures
    /// degrade to an Error-presence card, never an error to the caller.
    async fn build_card(&self, robot_id: &str, user_id: &str) -> OfficeCard {
        let display_name = match self.api.profile(user_id).await {
            Ok(profile) => profile.display_name,
            Err(e) => {
                warn!(
                    component = "directory",
                    event = "directory.profile_failed",
                    user_id = %user_id,
                    error = %e,
                    "Profile lookup failed"
                );
                return OfficeCard::new(
                    robot_id.to_string(),
                    user_id.to_string(),
                    user_id.to_string(),
                    Presence::Error,
                );
            }
        };

        let presence = match self.api.presence(user_id).await {
            Ok(raw) => Presence::classify(&raw),
            Err(e) => {
                warn!(
                    component = "directory",
                    event = "directory.presence_failed",
                    user_id = %user_id,
                    error = %e,
                    "Presence lookup failed"
                );
                Presence::Error
            }
        };

        OfficeCard::new(
            robot_id.to_string(),
            user_id.to_string(),
            display_name,
            presence,
        )
    }

    /// Fire-and-forget chat send (the AR "knock" button).
    pub fn send_chat(&self, robot_id: String, chat_id: String, message: String) {
        let api = self.api.clone();
        tokio::spawn(async move {
            match api.send_chat(&chat_id, &message).await {
                Ok(()) => {
                    info!(
                        component = "directory",
                        event = "directory.chat_sent",
                        robot_id = %robot_id,
                        chat_id = %chat_id,
                        "Chat message sent"
                    );
                }
                Err(e) => {
                    warn!(
                        component = "directory",
                        event = "directory.chat_failed",
                        robot_id = %robot_id,
                        chat_id = %chat_id,
                        error = %e,
                        "Chat send failed"
                    );
                }
            }
        });
    }
}

/// HTTP directory client against a Graph-style API.
pub struct GraphDirectory {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

#[derive(Deserialize)]
struct ProfileResponse {
    #[serde(rename = "displayName")]
    display_name: String,
}

#[derive(Deserialize)]
struct PresenceResponse {
    availability: String,
}

#[derive(serde::Serialize)]
struct ChatBody<'a> {
    body: ChatContent<'a>,
}

#[derive(serde::Serialize)]
struct ChatContent<'a> {
    content: &'a str,
}

impl GraphDirectory {
    pub fn new(base_url: String, token: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        }
    }

    fn token(&self) -> Result<&str, DirectoryError> {
        self.token.as_deref().ok_or(DirectoryError::MissingToken)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
    ) -> Result<T, DirectoryError> {
        let response = self
            .http
            .get(format!("{}{}", self.base_url, path))
            .bearer_auth(self.token()?)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(DirectoryError::Status(status.as_u16()));
        }
        Ok(response.json().await?)
    }
}

impl DirectoryApi for GraphDirectory {
    fn profile<'a>(
        &'a self,
        user_id: &'a str,
    ) -> BoxFuture<'a, Result<UserProfile, DirectoryError>> {
        Box::pin(async move {
            let profile: ProfileResponse = self.get_json(&format!("/users/{user_id}")).await?;
            Ok(UserProfile {
                display_name: profile.display_name,
            })
        })
    }

    fn presence<'a>(&'a self, user_id: &'a str) -> BoxFuture<'a, Result<String, DirectoryError>> {
        Box::pin(async move {
            let presence: PresenceResponse =
                self.get_json(&format!("/users/{user_id}/presence")).await?;
            Ok(presence.availability)
        })
    }

    fn send_chat<'a>(
        &'a self,
        chat_id: &'a str,
        message: &'a str,
    ) -> BoxFuture<'a, Result<(), DirectoryError>> {
        Box::pin(async move {
            let response = self
                .http
                .post(format!("{}/chats/{chat_id}/messages", self.base_url))
                .bearer_auth(self.token()?)
                .timeout(REQUEST_TIMEOUT)
                .json(&ChatBody {
                    body: ChatContent { content: message },
                })
                .send()
                .await?;

            let status = response.status();
            if !status.is_success() {
                return Err(DirectoryError::Status(status.as_u16()));
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct MockApi {
        profile_calls: AtomicUsize,
        presence_calls: AtomicUsize,
        chat_calls: AtomicUsize,
        delay: Duration,
        availability: String,
        fail_profile: bool,
    }

    impl MockApi {
        fn new(availability: &str, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                profile_calls: AtomicUsize::new(0),
                presence_calls: AtomicUsize::new(0),
                chat_calls: AtomicUsize::new(0),
                delay,
                availability: availability.to_string(),
                fail_profile: false,
            })
        }

        fn failing(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                profile_calls: AtomicUsize::new(0),
                presence_calls: AtomicUsize::new(0),
                chat_calls: AtomicUsize::new(0),
                delay,
                availability: String::new(),
                fail_profile: true,
            })
        }
    }

    impl DirectoryApi for MockApi {
        fn profile<'a>(
            &'a self,
            user_id: &'a str,
        ) -> BoxFuture<'a, Result<UserProfile, DirectoryError>> {
            Box::pin(async move {
                self.profile_calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(self.delay).await;
                if self.fail_profile {
                    return Err(DirectoryError::Status(503));
                }
                Ok(UserProfile {
                    display_name: format!("Occupant {user_id}"),
                })
            })
        }

        fn presence<'a>(
            &'a self,
            _user_id: &'a str,
        ) -> BoxFuture<'a, Result<String, DirectoryError>> {
            Box::pin(async move {
                self.presence_calls.fetch_add(1, Ordering::SeqCst);
                Ok(self.availability.clone())
            })
        }

        fn send_chat<'a>(
            &'a self,
            _chat_id: &'a str,
            _message: &'a str,
        ) -> BoxFuture<'a, Result<(), DirectoryError>> {
            Box::pin(async move {
                self.chat_calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        }
    }

    async fn recv_card(rx: &mut mpsc::Receiver<CoordinatorEvent>) -> OfficeCard {
        match tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("event before timeout")
            .expect("channel open")
        {
            CoordinatorEvent::OfficeCardReady { card } => card,
            _ => panic!("expected an office card event"),
        }
    }

    #[tokio::test]
    async fn aggregates_profile_and_presence() {
        let api = MockApi::new("Available", Duration::ZERO);
        let (tx, mut rx) = mpsc::channel(16);
        let adapter = DirectoryAdapter::new(api.clone(), tx);

        adapter.request_card("R1".to_string(), "u1".to_string());
        let card = recv_card(&mut rx).await;

        assert_eq!(card.robot_id, "R1");
        assert_eq!(card.user_id, "u1");
        assert_eq!(card.display_name, "Occupant u1");
        assert_eq!(card.presence_label, "Available");
        assert_eq!(card.presence_color, "#93c353");
    }

    #[tokio::test]
    async fn duplicate_requests_coalesce_onto_one_lookup() {
        let api = MockApi::new("Busy", Duration::from_millis(50));
        let (tx, mut rx) = mpsc::channel(16);
        let adapter = DirectoryAdapter::new(api.clone(), tx);

        adapter.request_card("R1".to_string(), "u1".to_string());
        adapter.request_card("R1".to_string(), "u1".to_string());
        adapter.request_card("R1".to_string(), "u1".to_string());

        let card = recv_card(&mut rx).await;
        assert_eq!(card.presence_label, "Busy");

        assert_eq!(api.profile_calls.load(Ordering::SeqCst), 1);
        assert_eq!(api.presence_calls.load(Ordering::SeqCst), 1);

        // Exactly one event for the three requests.
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn completed_cards_are_served_from_cache() {
        let api = MockApi::new("Away", Duration::ZERO);
        let (tx, mut rx) = mpsc::channel(16);
        let adapter =
            DirectoryAdapter::with_cache_ttl(api.clone(), tx, Duration::from_secs(60));

        adapter.request_card("R1".to_string(), "u1".to_string());
        let first = recv_card(&mut rx).await;

        adapter.request_card("R1".to_string(), "u1".to_string());
        let second = recv_card(&mut rx).await;

        assert_eq!(first, second);
        assert_eq!(api.profile_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn distinct_keys_do_not_coalesce() {
        let api = MockApi::new("Offline", Duration::from_millis(20));
        let (tx, mut rx) = mpsc::channel(16);
        let adapter = DirectoryAdapter::new(api.clone(), tx);

        adapter.request_card("R1".to_string(), "u1".to_string());
        adapter.request_card("R1".to_string(), "u2".to_string());

        let _ = recv_card(&mut rx).await;
        let _ = recv_card(&mut rx).await;
        assert_eq!(api.profile_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn lookup_failure_degrades_to_error_card() {
        let api = MockApi::failing(Duration::ZERO);
        let (tx, mut rx) = mpsc::channel(16);
        let adapter = DirectoryAdapter::new(api, tx);

        adapter.request_card("R1".to_string(), "u1".to_string());
        let card = recv_card(&mut rx).await;

        assert_eq!(card.presence_label, "Error");
        assert_eq!(card.presence_color, "#9c9c9c");
        assert_eq!(card.display_name, "u1");
    }

    #[tokio::test]
    async fn chat_send_reaches_the_api() {
        let api = MockApi::new("Available", Duration::ZERO);
        let (tx, _rx) = mpsc::channel(16);
        let adapter = DirectoryAdapter::new(api.clone(), tx);

        adapter.send_chat(
            "R1".to_string(),
            "chat-1".to_string(),
            "Hi, I'm outside your office using a telepresence robot.".to_string(),
        );

        for _ in 0..50 {
            if api.chat_calls.load(Ordering::SeqCst) == 1 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("chat send never reached the API");
    }
}
