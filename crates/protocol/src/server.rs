//! Server → Client messages

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::OfficeCard;

/// Messages fanned out from the server to session members.
///
/// Relay messages carry `target` (the robot identity the payload concerns)
/// so consumers sharing a transport can self-filter, even though delivery
/// is already scoped to the target's session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    // Room membership
    UserConnected {
        target: String,
        driver_id: String,
    },
    UserDisconnected {
        target: String,
        driver_id: String,
    },

    // Relay payloads
    ControlMsg {
        target: String,
        content: Value,
    },
    ClickToDrive {
        target: String,
        x_coord: f64,
        y_coord: f64,
        attempt: bool,
    },
    HealthMsg {
        target: String,
        kind: String,
        status: Value,
    },

    // Robot lifecycle
    RobotDisconnected {
        target: String,
    },
    RobotOffline {
        target: String,
    },

    // Directory
    OfficeCard {
        #[serde(flatten)]
        card: OfficeCard,
    },

    // Errors
    Error {
        code: String,
        message: String,
    },
}
