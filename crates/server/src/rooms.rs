//! Room manager — groups connections into per-robot sessions.
//!
//! One `RobotSession` per robot identity: the robot's own connection plus
//! any number of driver observers. Like the identity registry, this lives
//! inside the coordinator task, so joins and leaves are serialized with
//! membership reads by construction.

use std::collections::{HashMap, HashSet};

use roverlink_protocol::{HealthSnapshot, Role};

use crate::registry::ConnectionId;

/// Logical room for one robot identity.
pub struct RobotSession {
    pub robot_id: String,
    members: HashSet<ConnectionId>,
    robot_conn: Option<ConnectionId>,
    last_health: Option<HealthSnapshot>,
}

impl RobotSession {
    fn new(robot_id: String) -> Self {
        Self {
            robot_id,
            members: HashSet::new(),
            robot_conn: None,
            last_health: None,
        }
    }

    /// Whether the robot's own connection is currently present.
    pub fn robot_online(&self) -> bool {
        self.robot_conn.is_some()
    }

    pub fn contains(&self, conn_id: ConnectionId) -> bool {
        self.members.contains(&conn_id)
    }

    pub fn last_health(&self) -> Option<&HealthSnapshot> {
        self.last_health.as_ref()
    }
}

/// What a join observed, for the peer-joined broadcast and offline/health
/// replies to the joiner.
pub struct JoinOutcome {
    /// Members present before this join (broadcast recipients).
    pub existing_members: Vec<ConnectionId>,
    pub robot_online: bool,
    pub last_health: Option<HealthSnapshot>,
}

/// What a leave freed, for the peer-left broadcast.
pub struct LeaveOutcome {
    pub robot_id: String,
    /// Members remaining after the leave.
    pub remaining: Vec<ConnectionId>,
    pub was_robot: bool,
    pub session_deleted: bool,
}

/// All robot sessions, with a reverse index for O(1) leave.
#[derive(Default)]
pub struct RoomManager {
    sessions: HashMap<String, RobotSession>,
    membership: HashMap<ConnectionId, String>,
}

impl RoomManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection to the session for `robot_id`, creating the session
    /// if absent. A connection belongs to at most one session: joining a
    /// second room leaves the first (the returned `LeaveOutcome` carries
    /// the peer-left broadcast for it).
    pub fn join(
        &mut self,
        conn_id: ConnectionId,
        robot_id: &str,
        role: Role,
    ) -> (JoinOutcome, Option<LeaveOutcome>) {
        let moved_from = match self.membership.get(&conn_id) {
            Some(current) if current != robot_id => self.leave(conn_id),
            _ => None,
        };

        let session = self
            .sessions
            .entry(robot_id.to_string())
            .or_insert_with(|| RobotSession::new(robot_id.to_string()));

        let existing_members: Vec<ConnectionId> = session
            .members
            .iter()
            .copied()
            .filter(|m| *m != conn_id)
            .collect();

        session.members.insert(conn_id);
        if role == Role::Robot {
            session.robot_conn = Some(conn_id);
        }
        self.membership.insert(conn_id, robot_id.to_string());

        (
            JoinOutcome {
                existing_members,
                robot_online: session.robot_online(),
                last_health: session.last_health.clone(),
            },
            moved_from,
        )
    }

    /// Remove a connection from whatever session it belongs to. A robot
    /// leaving marks its session offline; the session itself is deleted
    /// only once the member set empties.
    pub fn leave(&mut self, conn_id: ConnectionId) -> Option<LeaveOutcome> {
        let robot_id = self.membership.remove(&conn_id)?;
        let session = self.sessions.get_mut(&robot_id)?;

        session.members.remove(&conn_id);
        let was_robot = session.robot_conn == Some(conn_id);
        if was_robot {
            session.robot_conn = None;
        }

        let remaining: Vec<ConnectionId> = session.members.iter().copied().collect();
        let session_deleted = session.members.is_empty();
        if session_deleted {
            self.sessions.remove(&robot_id);
        }

        Some(LeaveOutcome {
            robot_id,
            remaining,
            was_robot,
            session_deleted,
        })
    }

    /// Record the latest telemetry for a session, for replay to drivers who
    /// join later.
    pub fn record_health(&mut self, robot_id: &str, snapshot: HealthSnapshot) {
        if let Some(session) = self.sessions.get_mut(robot_id) {
            session.last_health = Some(snapshot);
        }
    }

    pub fn session(&self, robot_id: &str) -> Option<&RobotSession> {
        self.sessions.get(robot_id)
    }

    /// Session a connection currently belongs to.
    pub fn session_of(&self, conn_id: ConnectionId) -> Option<&str> {
        self.membership.get(&conn_id).map(String::as_str)
    }

    /// Members of the session for `robot_id`; empty when no such session.
    pub fn members_of(&self, robot_id: &str) -> Vec<ConnectionId> {
        self.sessions
            .get(robot_id)
            .map(|s| s.members.iter().copied().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn join_then_leave_leaves_no_trace() {
        let mut rooms = RoomManager::new();
        rooms.join(1, "R1", Role::Driver);

        let outcome = rooms.leave(1).expect("was a member");
        assert_eq!(outcome.robot_id, "R1");
        assert!(outcome.session_deleted);
        assert!(rooms.session("R1").is_none());
        assert!(rooms.session_of(1).is_none());
        assert!(rooms.members_of("R1").is_empty());
    }

    #[test]
    fn join_reports_existing_members_only() {
        let mut rooms = RoomManager::new();
        let (first, _) = rooms.join(10, "R1", Role::Robot);
        assert!(first.existing_members.is_empty());

        let (second, _) = rooms.join(20, "R1", Role::Driver);
        assert_eq!(second.existing_members, vec![10]);
        assert!(second.robot_online);
    }

    #[test]
    fn robot_leave_marks_session_offline_but_keeps_drivers() {
        let mut rooms = RoomManager::new();
        rooms.join(10, "R1", Role::Robot);
        rooms.join(20, "R1", Role::Driver);

        let outcome = rooms.leave(10).expect("robot was a member");
        assert!(outcome.was_robot);
        assert!(!outcome.session_deleted);
        assert_eq!(outcome.remaining, vec![20]);

        let session = rooms.session("R1").expect("session survives");
        assert!(!session.robot_online());
        assert!(session.contains(20));
    }

    #[test]
    fn rejoining_another_room_moves_the_connection() {
        let mut rooms = RoomManager::new();
        rooms.join(10, "R1", Role::Robot);
        rooms.join(20, "R1", Role::Driver);

        let (_, moved) = rooms.join(20, "R2", Role::Driver);
        let moved = moved.expect("left R1 implicitly");
        assert_eq!(moved.robot_id, "R1");
        assert_eq!(moved.remaining, vec![10]);

        assert_eq!(rooms.session_of(20), Some("R2"));
        assert!(!rooms.session("R1").expect("R1 exists").contains(20));
    }

    #[test]
    fn rejoining_same_room_is_idempotent() {
        let mut rooms = RoomManager::new();
        rooms.join(20, "R1", Role::Driver);
        let (outcome, moved) = rooms.join(20, "R1", Role::Driver);
        assert!(moved.is_none());
        assert!(outcome.existing_members.is_empty());
        assert_eq!(rooms.members_of("R1"), vec![20]);
    }

    #[test]
    fn health_snapshot_replayed_to_late_joiner() {
        let mut rooms = RoomManager::new();
        rooms.join(10, "R1", Role::Robot);
        rooms.record_health(
            "R1",
            HealthSnapshot {
                kind: "battery".to_string(),
                status: json!(81),
            },
        );

        let (outcome, _) = rooms.join(20, "R1", Role::Driver);
        let health = outcome.last_health.expect("snapshot replayed");
        assert_eq!(health.kind, "battery");
        assert_eq!(health.status, json!(81));
    }

    #[test]
    fn health_for_unknown_session_is_dropped() {
        let mut rooms = RoomManager::new();
        rooms.record_health(
            "ghost",
            HealthSnapshot {
                kind: "battery".to_string(),
                status: json!(1),
            },
        );
        assert!(rooms.session("ghost").is_none());
    }
}
