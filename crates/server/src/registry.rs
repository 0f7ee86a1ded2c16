//! Identity registry — maps live connections to robot/driver identities.
//!
//! Owned exclusively by the coordinator task; all mutation happens inside
//! its single-threaded event loop, so no locking is needed. The registry is
//! the single source of truth for which connections exist — room membership
//! is cleaned up synchronously with removal here.

use std::collections::HashMap;
use std::time::Instant;

use tokio::sync::mpsc;

use roverlink_protocol::ServerMessage;

/// Opaque id for one live transport connection.
pub type ConnectionId = u64;

/// Outbound queue for one connected peer.
pub type PeerSender = mpsc::Sender<ServerMessage>;

/// A live transport session and its identity bindings.
pub struct Connection {
    outbound: PeerSender,
    robot: Option<String>,
    driver: Option<String>,
    connected_at: Instant,
}

impl Connection {
    /// Robot identity this connection registered as, if any.
    pub fn robot(&self) -> Option<&str> {
        self.robot.as_deref()
    }

    /// Driver identity this connection joined as, if any.
    pub fn driver(&self) -> Option<&str> {
        self.driver.as_deref()
    }

    pub fn connected_at(&self) -> Instant {
        self.connected_at
    }
}

/// Process-lifetime registry of live connections.
#[derive(Default)]
pub struct IdentityRegistry {
    connections: HashMap<ConnectionId, Connection>,
}

impl IdentityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a newly opened connection.
    pub fn add(&mut self, conn_id: ConnectionId, outbound: PeerSender) {
        self.connections.insert(
            conn_id,
            Connection {
                outbound,
                robot: None,
                driver: None,
                connected_at: Instant::now(),
            },
        );
    }

    /// Destroy a connection, returning it so the caller can inspect the
    /// identities it held. Unknown ids are a no-op.
    pub fn remove(&mut self, conn_id: ConnectionId) -> Option<Connection> {
        self.connections.remove(&conn_id)
    }

    /// Bind a connection to a robot identity. Idempotent — a repeat call
    /// overwrites the prior binding.
    pub fn register(&mut self, conn_id: ConnectionId, robot_id: String) {
        if let Some(conn) = self.connections.get_mut(&conn_id) {
            conn.robot = Some(robot_id);
        }
    }

    /// Clear a connection's robot binding, returning the identity it was
    /// bound to. Unknown connections are a no-op, not an error.
    pub fn unregister(&mut self, conn_id: ConnectionId) -> Option<String> {
        self.connections
            .get_mut(&conn_id)
            .and_then(|conn| conn.robot.take())
    }

    /// Record the driver identity a connection joined as.
    pub fn set_driver(&mut self, conn_id: ConnectionId, driver_id: String) {
        if let Some(conn) = self.connections.get_mut(&conn_id) {
            conn.driver = Some(driver_id);
        }
    }

    pub fn get(&self, conn_id: ConnectionId) -> Option<&Connection> {
        self.connections.get(&conn_id)
    }

    pub fn contains(&self, conn_id: ConnectionId) -> bool {
        self.connections.contains_key(&conn_id)
    }

    /// Outbound queue for a connection, if it is still live.
    pub fn sender(&self, conn_id: ConnectionId) -> Option<&PeerSender> {
        self.connections.get(&conn_id).map(|c| &c.outbound)
    }

    /// The set of robot identities currently bound to a live connection.
    pub fn active_robots(&self) -> Vec<String> {
        let mut robots: Vec<String> = self
            .connections
            .values()
            .filter_map(|c| c.robot.clone())
            .collect();
        robots.sort();
        robots.dedup();
        robots
    }
}
