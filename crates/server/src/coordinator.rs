//! Session coordinator — owns the identity registry and room manager and
//! processes connection events sequentially.
//!
//! All registry/room mutation happens inside this one task, one event at a
//! time in arrival order, so membership reads are serialized with joins and
//! leaves and no locking is needed. Per-connection ordering is preserved:
//! each WebSocket read loop feeds this queue in submission order. External
//! calls (webhooks, directory lookups) run as spawned tasks that enqueue a
//! follow-up event on completion instead of suspending the loop.

use std::sync::Arc;
use std::time::Instant;

use arc_swap::ArcSwap;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use roverlink_protocol::{ClientMessage, HealthSnapshot, OfficeCard, Role, ServerMessage};

use crate::directory::DirectoryAdapter;
use crate::dispatch::ActionDispatcher;
use crate::registry::{ConnectionId, IdentityRegistry, PeerSender};
use crate::relay;
use crate::rooms::{LeaveOutcome, RoomManager};

/// Events processed by the coordinator loop.
pub enum CoordinatorEvent {
    /// A transport connection opened.
    Connected {
        conn_id: ConnectionId,
        outbound: PeerSender,
    },
    /// A parsed message arrived from a connection.
    Inbound {
        conn_id: ConnectionId,
        msg: ClientMessage,
    },
    /// A transport connection closed.
    Disconnected { conn_id: ConnectionId },
    /// A directory lookup completed.
    OfficeCardReady { card: OfficeCard },
}

/// Cheap-to-clone handle for enqueueing events.
#[derive(Clone)]
pub struct CoordinatorHandle {
    events: mpsc::Sender<CoordinatorEvent>,
}

impl CoordinatorHandle {
    pub fn new(events: mpsc::Sender<CoordinatorEvent>) -> Self {
        Self { events }
    }

    /// Enqueue an event (fire-and-forget).
    pub async fn send(&self, event: CoordinatorEvent) {
        if self.events.send(event).await.is_err() {
            warn!(
                component = "coordinator",
                event = "coordinator.channel_closed",
                "Coordinator loop is gone, event dropped"
            );
        }
    }
}

pub struct Coordinator {
    events_rx: mpsc::Receiver<CoordinatorEvent>,
    registry: IdentityRegistry,
    rooms: RoomManager,
    dispatcher: ActionDispatcher,
    directory: DirectoryAdapter,
    active_robots: Arc<ArcSwap<Vec<String>>>,
}

impl Coordinator {
    pub fn new(
        events_rx: mpsc::Receiver<CoordinatorEvent>,
        dispatcher: ActionDispatcher,
        directory: DirectoryAdapter,
        active_robots: Arc<ArcSwap<Vec<String>>>,
    ) -> Self {
        Self {
            events_rx,
            registry: IdentityRegistry::new(),
            rooms: RoomManager::new(),
            dispatcher,
            directory,
            active_robots,
        }
    }

    /// Drive the event loop until every handle is dropped.
    pub async fn run(mut self) {
        info!(
            component = "coordinator",
            event = "coordinator.started",
            "Coordinator loop started"
        );
        while let Some(event) = self.events_rx.recv().await {
            self.handle(event);
        }
        info!(
            component = "coordinator",
            event = "coordinator.stopped",
            "Coordinator loop stopped"
        );
    }

    // Synchronous on purpose: the loop never suspends mid-mutation.
    fn handle(&mut self, event: CoordinatorEvent) {
        match event {
            CoordinatorEvent::Connected { conn_id, outbound } => {
                self.registry.add(conn_id, outbound);
                info!(
                    component = "coordinator",
                    event = "connection.opened",
                    connection_id = conn_id,
                    "Connection tracked"
                );
            }

            CoordinatorEvent::Disconnected { conn_id } => self.on_disconnect(conn_id),

            CoordinatorEvent::Inbound { conn_id, msg } => self.on_inbound(conn_id, msg),

            CoordinatorEvent::OfficeCardReady { card } => {
                let members = self.rooms.members_of(&card.robot_id);
                if members.is_empty() {
                    // Requester disconnected while the lookup was in flight.
                    debug!(
                        component = "coordinator",
                        event = "directory.card_dropped",
                        robot_id = %card.robot_id,
                        "Office card ready but session is empty"
                    );
                    return;
                }
                for member in members {
                    self.deliver(member, ServerMessage::OfficeCard { card: card.clone() });
                }
            }
        }
    }

    fn on_inbound(&mut self, conn_id: ConnectionId, msg: ClientMessage) {
        if !self.registry.contains(conn_id) {
            debug!(
                component = "coordinator",
                event = "message.unknown_connection",
                connection_id = conn_id,
                "Message from untracked connection dropped"
            );
            return;
        }

        match msg {
            ClientMessage::RobotAlive { robot_id } => {
                self.registry.register(conn_id, robot_id.clone());
                self.join_room(conn_id, &robot_id, robot_id.clone(), Role::Robot);
                self.publish_robots();
                info!(
                    component = "coordinator",
                    event = "robot.registered",
                    connection_id = conn_id,
                    robot_id = %robot_id,
                    "Robot registered"
                );
            }

            ClientMessage::JoinRobot {
                robot_id,
                driver_id,
            } => {
                self.registry.set_driver(conn_id, driver_id.clone());
                let outcome = self.join_room(conn_id, &robot_id, driver_id.clone(), Role::Driver);
                info!(
                    component = "coordinator",
                    event = "session.driver_joined",
                    connection_id = conn_id,
                    robot_id = %robot_id,
                    driver_id = %driver_id,
                    robot_online = outcome.robot_online,
                    "Driver joined session"
                );

                if !outcome.robot_online {
                    self.deliver(
                        conn_id,
                        ServerMessage::RobotOffline {
                            target: robot_id.clone(),
                        },
                    );
                }
                if let Some(health) = outcome.last_health {
                    self.deliver(
                        conn_id,
                        ServerMessage::HealthMsg {
                            target: robot_id,
                            kind: health.kind,
                            status: health.status,
                        },
                    );
                }
            }

            msg @ (ClientMessage::ControlMsg { .. }
            | ClientMessage::ClickToDrive { .. }
            | ClientMessage::HealthMsg { .. }) => self.relay(conn_id, msg),

            ClientMessage::TriggerAction { action_id } => {
                info!(
                    component = "coordinator",
                    event = "action.triggered",
                    connection_id = conn_id,
                    action_id = %action_id,
                    "Smart action triggered"
                );
                self.dispatcher.spawn_dispatch(action_id);
            }

            ClientMessage::ChatMsg {
                robot_id,
                chat_id,
                message,
            } => {
                self.directory.send_chat(robot_id, chat_id, message);
            }

            ClientMessage::GetOfficeCard { robot_id, user_id } => {
                self.directory.request_card(robot_id, user_id);
            }
        }
    }

    /// Relay a control/click/health payload to the target's session
    /// members (origin included — consumers self-filter on `target`).
    fn relay(&mut self, conn_id: ConnectionId, msg: ClientMessage) {
        if let ClientMessage::HealthMsg {
            kind,
            status,
            robot_id,
        } = &msg
        {
            self.rooms.record_health(
                robot_id,
                HealthSnapshot {
                    kind: kind.clone(),
                    status: status.clone(),
                },
            );
        }

        match relay::annotate(&msg) {
            Ok(Some((target, outbound))) => {
                let members = self.rooms.members_of(&target);
                if members.is_empty() {
                    debug!(
                        component = "coordinator",
                        event = "relay.no_session",
                        connection_id = conn_id,
                        target = %target,
                        "Relay message for unknown robot, no recipients"
                    );
                    return;
                }
                for member in members {
                    self.deliver(member, outbound.clone());
                }
            }
            Ok(None) => {}
            Err(e) => {
                warn!(
                    component = "coordinator",
                    event = "relay.rejected",
                    connection_id = conn_id,
                    error = %e,
                    "Relay payload rejected"
                );
                self.deliver(
                    conn_id,
                    ServerMessage::Error {
                        code: "invalid_payload".to_string(),
                        message: e.to_string(),
                    },
                );
            }
        }
    }

    /// Join a room and broadcast peer-joined to the members that were
    /// already present. `peer_id` is the joiner's identity as seen by
    /// peers: the driver id, or the robot id for the robot's own join.
    fn join_room(
        &mut self,
        conn_id: ConnectionId,
        robot_id: &str,
        peer_id: String,
        role: Role,
    ) -> crate::rooms::JoinOutcome {
        let (outcome, moved_from) = self.rooms.join(conn_id, robot_id, role);
        if let Some(left) = moved_from {
            self.broadcast_peer_left(conn_id, &left);
        }

        for member in &outcome.existing_members {
            self.deliver(
                *member,
                ServerMessage::UserConnected {
                    target: robot_id.to_string(),
                    driver_id: peer_id.clone(),
                },
            );
        }
        outcome
    }

    fn on_disconnect(&mut self, conn_id: ConnectionId) {
        if let Some(left) = self.rooms.leave(conn_id) {
            self.broadcast_peer_left(conn_id, &left);
        }

        if let Some(conn) = self.registry.remove(conn_id) {
            if conn.robot().is_some() {
                self.publish_robots();
            }
            info!(
                component = "coordinator",
                event = "connection.closed",
                connection_id = conn_id,
                robot_id = ?conn.robot(),
                driver_id = ?conn.driver(),
                uptime_secs = Instant::now()
                    .duration_since(conn.connected_at())
                    .as_secs(),
                "Connection closed"
            );
        }
    }

    /// Tell the remaining members a peer left: `robot-disconnected` when
    /// the robot's own connection dropped, `user-disconnected` otherwise.
    fn broadcast_peer_left(&mut self, conn_id: ConnectionId, left: &LeaveOutcome) {
        if left.was_robot {
            for member in &left.remaining {
                self.deliver(
                    *member,
                    ServerMessage::RobotDisconnected {
                        target: left.robot_id.clone(),
                    },
                );
            }
            return;
        }

        let driver_id = self
            .registry
            .get(conn_id)
            .and_then(|c| c.driver())
            .unwrap_or_default()
            .to_string();
        for member in &left.remaining {
            self.deliver(
                *member,
                ServerMessage::UserDisconnected {
                    target: left.robot_id.clone(),
                    driver_id: driver_id.clone(),
                },
            );
        }
    }

    /// Queue a message on a peer's outbound channel. Never blocks the loop:
    /// a peer whose queue is full loses the message (its forwarder task is
    /// not draining fast enough).
    fn deliver(&self, conn_id: ConnectionId, msg: ServerMessage) {
        let Some(sender) = self.registry.sender(conn_id) else {
            debug!(
                component = "coordinator",
                event = "delivery.no_connection",
                connection_id = conn_id,
                "Delivery target no longer connected"
            );
            return;
        };
        if let Err(e) = sender.try_send(msg) {
            warn!(
                component = "coordinator",
                event = "delivery.dropped",
                connection_id = conn_id,
                error = %e,
                "Outbound queue unavailable, message dropped"
            );
        }
    }

    fn publish_robots(&self) {
        self.active_robots
            .store(Arc::new(self.registry.active_robots()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use serde_json::json;

    use crate::directory::{DirectoryAdapter, DirectoryApi, DirectoryError, UserProfile};
    use crate::store::Store;
    use futures::future::BoxFuture;

    struct StaticApi;

    impl DirectoryApi for StaticApi {
        fn profile<'a>(
            &'a self,
            user_id: &'a str,
        ) -> BoxFuture<'a, Result<UserProfile, DirectoryError>> {
            Box::pin(async move {
                Ok(UserProfile {
                    display_name: format!("Occupant {user_id}"),
                })
            })
        }

        fn presence<'a>(
            &'a self,
            _user_id: &'a str,
        ) -> BoxFuture<'a, Result<String, DirectoryError>> {
            Box::pin(async move { Ok("Available".to_string()) })
        }

        fn send_chat<'a>(
            &'a self,
            _chat_id: &'a str,
            _message: &'a str,
        ) -> BoxFuture<'a, Result<(), DirectoryError>> {
            Box::pin(async move { Ok(()) })
        }
    }

    struct Harness {
        handle: CoordinatorHandle,
        active_robots: Arc<ArcSwap<Vec<String>>>,
        _dir: tempfile::TempDir,
    }

    fn harness() -> Harness {
        let dir = tempfile::tempdir().expect("tempdir");
        let (store, writer) = Store::open(dir.path().join("test.db"));
        tokio::spawn(writer.run());

        let (tx, rx) = mpsc::channel(256);
        let handle = CoordinatorHandle::new(tx.clone());
        let directory = DirectoryAdapter::new(Arc::new(StaticApi), tx);
        let dispatcher = ActionDispatcher::new(store);
        let active_robots = Arc::new(ArcSwap::from_pointee(Vec::new()));

        let coordinator = Coordinator::new(rx, dispatcher, directory, active_robots.clone());
        tokio::spawn(coordinator.run());

        Harness {
            handle,
            active_robots,
            _dir: dir,
        }
    }

    struct Peer {
        conn_id: ConnectionId,
        rx: mpsc::Receiver<ServerMessage>,
    }

    impl Peer {
        async fn connect(harness: &Harness, conn_id: ConnectionId) -> Peer {
            let (tx, rx) = mpsc::channel(64);
            harness
                .handle
                .send(CoordinatorEvent::Connected {
                    conn_id,
                    outbound: tx,
                })
                .await;
            Peer { conn_id, rx }
        }

        async fn send(&self, harness: &Harness, msg: ClientMessage) {
            harness
                .handle
                .send(CoordinatorEvent::Inbound {
                    conn_id: self.conn_id,
                    msg,
                })
                .await;
        }

        async fn recv(&mut self) -> ServerMessage {
            tokio::time::timeout(Duration::from_secs(1), self.rx.recv())
                .await
                .expect("message before timeout")
                .expect("channel open")
        }
    }

    async fn robots_snapshot(harness: &Harness, expected_len: usize) -> Vec<String> {
        for _ in 0..100 {
            let robots = harness.active_robots.load_full();
            if robots.len() == expected_len {
                return robots.as_ref().clone();
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        harness.active_robots.load_full().as_ref().clone()
    }

    #[tokio::test]
    async fn robot_session_end_to_end() {
        let harness = harness();

        // Robot connects and registers
        let mut robot = Peer::connect(&harness, 1).await;
        robot
            .send(
                &harness,
                ClientMessage::RobotAlive {
                    robot_id: "R1".to_string(),
                },
            )
            .await;
        assert_eq!(robots_snapshot(&harness, 1).await, vec!["R1"]);

        // Driver joins — robot sees the peer arrive
        let mut driver = Peer::connect(&harness, 2).await;
        driver
            .send(
                &harness,
                ClientMessage::JoinRobot {
                    robot_id: "R1".to_string(),
                    driver_id: "D1".to_string(),
                },
            )
            .await;
        assert_eq!(
            robot.recv().await,
            ServerMessage::UserConnected {
                target: "R1".to_string(),
                driver_id: "D1".to_string(),
            }
        );

        // Committed click relays with the original wire shape
        driver
            .send(
                &harness,
                ClientMessage::ClickToDrive {
                    x: 0.5,
                    y: 0.5,
                    attempt: true,
                    robot_id: "R1".to_string(),
                },
            )
            .await;
        assert_eq!(
            robot.recv().await,
            ServerMessage::ClickToDrive {
                target: "R1".to_string(),
                x_coord: 0.5,
                y_coord: 0.5,
                attempt: true,
            }
        );

        // Robot disconnects — driver is told, registry forgets R1
        harness
            .handle
            .send(CoordinatorEvent::Disconnected { conn_id: 1 })
            .await;
        // Driver also got an echo of its own click first.
        assert_eq!(
            driver.recv().await,
            ServerMessage::ClickToDrive {
                target: "R1".to_string(),
                x_coord: 0.5,
                y_coord: 0.5,
                attempt: true,
            }
        );
        assert_eq!(
            driver.recv().await,
            ServerMessage::RobotDisconnected {
                target: "R1".to_string(),
            }
        );
        assert!(robots_snapshot(&harness, 0).await.is_empty());
    }

    #[tokio::test]
    async fn same_origin_messages_relay_in_submission_order() {
        let harness = harness();
        let mut robot = Peer::connect(&harness, 1).await;
        robot
            .send(
                &harness,
                ClientMessage::RobotAlive {
                    robot_id: "R1".to_string(),
                },
            )
            .await;
        let driver = Peer::connect(&harness, 2).await;
        driver
            .send(
                &harness,
                ClientMessage::JoinRobot {
                    robot_id: "R1".to_string(),
                    driver_id: "D1".to_string(),
                },
            )
            .await;
        let _ = robot.recv().await; // user-connected

        for (i, x) in [0.1, 0.2, 0.3, 0.4].iter().enumerate() {
            driver
                .send(
                    &harness,
                    ClientMessage::ClickToDrive {
                        x: *x,
                        y: 0.5,
                        attempt: i == 3,
                        robot_id: "R1".to_string(),
                    },
                )
                .await;
        }

        for x in [0.1, 0.2, 0.3, 0.4] {
            match robot.recv().await {
                ServerMessage::ClickToDrive { x_coord, .. } => assert_eq!(x_coord, x),
                other => panic!("unexpected message: {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn relay_is_scoped_to_the_target_session() {
        let harness = harness();
        let mut robot1 = Peer::connect(&harness, 1).await;
        robot1
            .send(
                &harness,
                ClientMessage::RobotAlive {
                    robot_id: "R1".to_string(),
                },
            )
            .await;
        let mut robot2 = Peer::connect(&harness, 2).await;
        robot2
            .send(
                &harness,
                ClientMessage::RobotAlive {
                    robot_id: "R2".to_string(),
                },
            )
            .await;

        let driver = Peer::connect(&harness, 3).await;
        driver
            .send(
                &harness,
                ClientMessage::JoinRobot {
                    robot_id: "R2".to_string(),
                    driver_id: "D1".to_string(),
                },
            )
            .await;
        let _ = robot2.recv().await; // user-connected

        driver
            .send(
                &harness,
                ClientMessage::ControlMsg {
                    content: json!({"move": "forward"}),
                    robot_id: "R2".to_string(),
                },
            )
            .await;
        assert_eq!(
            robot2.recv().await,
            ServerMessage::ControlMsg {
                target: "R2".to_string(),
                content: json!({"move": "forward"}),
            }
        );

        // R1's robot saw nothing of R2's traffic.
        assert!(robot1.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn driver_joining_offline_robot_is_told() {
        let harness = harness();
        let mut driver = Peer::connect(&harness, 1).await;
        driver
            .send(
                &harness,
                ClientMessage::JoinRobot {
                    robot_id: "R1".to_string(),
                    driver_id: "D1".to_string(),
                },
            )
            .await;
        assert_eq!(
            driver.recv().await,
            ServerMessage::RobotOffline {
                target: "R1".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn late_driver_receives_health_snapshot() {
        let harness = harness();
        let robot = Peer::connect(&harness, 1).await;
        robot
            .send(
                &harness,
                ClientMessage::RobotAlive {
                    robot_id: "R1".to_string(),
                },
            )
            .await;
        robot
            .send(
                &harness,
                ClientMessage::HealthMsg {
                    kind: "battery".to_string(),
                    status: json!(74),
                    robot_id: "R1".to_string(),
                },
            )
            .await;

        let mut driver = Peer::connect(&harness, 2).await;
        driver
            .send(
                &harness,
                ClientMessage::JoinRobot {
                    robot_id: "R1".to_string(),
                    driver_id: "D1".to_string(),
                },
            )
            .await;
        assert_eq!(
            driver.recv().await,
            ServerMessage::HealthMsg {
                target: "R1".to_string(),
                kind: "battery".to_string(),
                status: json!(74),
            }
        );
    }

    #[tokio::test]
    async fn driver_disconnect_broadcasts_user_disconnected() {
        let harness = harness();
        let mut robot = Peer::connect(&harness, 1).await;
        robot
            .send(
                &harness,
                ClientMessage::RobotAlive {
                    robot_id: "R1".to_string(),
                },
            )
            .await;
        let driver = Peer::connect(&harness, 2).await;
        driver
            .send(
                &harness,
                ClientMessage::JoinRobot {
                    robot_id: "R1".to_string(),
                    driver_id: "D1".to_string(),
                },
            )
            .await;
        let _ = robot.recv().await; // user-connected

        harness
            .handle
            .send(CoordinatorEvent::Disconnected { conn_id: 2 })
            .await;
        assert_eq!(
            robot.recv().await,
            ServerMessage::UserDisconnected {
                target: "R1".to_string(),
                driver_id: "D1".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn office_card_reaches_session_members() {
        let harness = harness();
        let mut robot = Peer::connect(&harness, 1).await;
        robot
            .send(
                &harness,
                ClientMessage::RobotAlive {
                    robot_id: "R1".to_string(),
                },
            )
            .await;
        let mut driver = Peer::connect(&harness, 2).await;
        driver
            .send(
                &harness,
                ClientMessage::JoinRobot {
                    robot_id: "R1".to_string(),
                    driver_id: "D1".to_string(),
                },
            )
            .await;
        let _ = robot.recv().await; // user-connected

        driver
            .send(
                &harness,
                ClientMessage::GetOfficeCard {
                    robot_id: "R1".to_string(),
                    user_id: "u1".to_string(),
                },
            )
            .await;

        match driver.recv().await {
            ServerMessage::OfficeCard { card } => {
                assert_eq!(card.robot_id, "R1");
                assert_eq!(card.display_name, "Occupant u1");
                assert_eq!(card.presence_label, "Available");
            }
            other => panic!("unexpected message: {:?}", other),
        }
        match robot.recv().await {
            ServerMessage::OfficeCard { .. } => {}
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[tokio::test]
    async fn out_of_range_click_is_dropped_with_error_reply() {
        let harness = harness();
        let mut robot = Peer::connect(&harness, 1).await;
        robot
            .send(
                &harness,
                ClientMessage::RobotAlive {
                    robot_id: "R1".to_string(),
                },
            )
            .await;
        let mut driver = Peer::connect(&harness, 2).await;
        driver
            .send(
                &harness,
                ClientMessage::JoinRobot {
                    robot_id: "R1".to_string(),
                    driver_id: "D1".to_string(),
                },
            )
            .await;
        let _ = robot.recv().await; // user-connected

        driver
            .send(
                &harness,
                ClientMessage::ClickToDrive {
                    x: 2.0,
                    y: 0.5,
                    attempt: true,
                    robot_id: "R1".to_string(),
                },
            )
            .await;

        match driver.recv().await {
            ServerMessage::Error { code, .. } => assert_eq!(code, "invalid_payload"),
            other => panic!("unexpected message: {:?}", other),
        }
        assert!(robot.rx.try_recv().is_err());
    }
}
