//! Relay annotation — turns inbound relay payloads into tagged fan-out
//! messages.
//!
//! Pure functions, no IO: the coordinator decides recipients, this module
//! decides shape. Each relayed message is annotated with its target robot
//! identity so transport-sharing consumers can self-filter.

use roverlink_protocol::{ClientMessage, ServerMessage};

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum RelayError {
    #[error("click coordinate ({x}, {y}) outside unit square")]
    CoordinateOutOfRange { x: f64, y: f64 },
}

/// Annotate a relay payload with its target, or report why it was dropped.
///
/// Returns `Ok(None)` for message kinds that are not relayed (registration,
/// side-effect triggers, directory requests).
pub fn annotate(msg: &ClientMessage) -> Result<Option<(String, ServerMessage)>, RelayError> {
    match msg {
        ClientMessage::ControlMsg { content, robot_id } => Ok(Some((
            robot_id.clone(),
            ServerMessage::ControlMsg {
                target: robot_id.clone(),
                content: content.clone(),
            },
        ))),

        ClientMessage::ClickToDrive {
            x,
            y,
            attempt,
            robot_id,
        } => {
            if !(0.0..=1.0).contains(x) || !(0.0..=1.0).contains(y) {
                return Err(RelayError::CoordinateOutOfRange { x: *x, y: *y });
            }
            Ok(Some((
                robot_id.clone(),
                ServerMessage::ClickToDrive {
                    target: robot_id.clone(),
                    x_coord: *x,
                    y_coord: *y,
                    attempt: *attempt,
                },
            )))
        }

        ClientMessage::HealthMsg {
            kind,
            status,
            robot_id,
        } => Ok(Some((
            robot_id.clone(),
            ServerMessage::HealthMsg {
                target: robot_id.clone(),
                kind: kind.clone(),
                status: status.clone(),
            },
        ))),

        _ => Ok(None),
    }
}
