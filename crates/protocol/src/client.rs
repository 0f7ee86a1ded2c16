//! Client → Server messages

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Messages sent from robot/driver clients to the server.
///
/// The inner `kind` field of `health-msg` is named `kind` on the wire
/// (not `type`) because `type` is claimed by the enum tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    // Identity / room membership
    RobotAlive {
        robot_id: String,
    },
    JoinRobot {
        robot_id: String,
        driver_id: String,
    },

    // Relay payloads
    ControlMsg {
        content: Value,
        robot_id: String,
    },
    ClickToDrive {
        x: f64,
        y: f64,
        attempt: bool,
        robot_id: String,
    },
    HealthMsg {
        kind: String,
        status: Value,
        robot_id: String,
    },

    // Side effects
    TriggerAction {
        action_id: String,
    },
    ChatMsg {
        robot_id: String,
        chat_id: String,
        message: String,
    },
    GetOfficeCard {
        robot_id: String,
        user_id: String,
    },
}
