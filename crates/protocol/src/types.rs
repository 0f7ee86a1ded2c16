//! Core types shared across the protocol

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Role a connection plays inside a robot session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Driver,
    Robot,
}

/// Classified presence state for a directory occupant.
///
/// The raw availability strings come from the external directory API and
/// are folded case-insensitively into this fixed set. Unrecognized values
/// classify as `Error` — presence display degrades, it never fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Presence {
    Available,
    Away,
    Busy,
    DoNotDisturb,
    Offline,
    Error,
}

impl Presence {
    /// Fold a raw directory availability string into a presence class.
    ///
    /// The idle/transitional variants (`availableidle`, `berightback`,
    /// `busyidle`, `presenceunknown`) map to their base class.
    pub fn classify(raw: &str) -> Presence {
        match raw.to_lowercase().as_str() {
            "available" | "availableidle" => Presence::Available,
            "away" | "berightback" => Presence::Away,
            "busy" | "busyidle" => Presence::Busy,
            "donotdisturb" => Presence::DoNotDisturb,
            "offline" | "presenceunknown" => Presence::Offline,
            _ => Presence::Error,
        }
    }

    /// Human-readable label shown on the presence card.
    pub fn label(&self) -> &'static str {
        match self {
            Presence::Available => "Available",
            Presence::Away => "Away",
            Presence::Busy => "Busy",
            Presence::DoNotDisturb => "Do not disturb",
            Presence::Offline => "Offline",
            Presence::Error => "Error",
        }
    }

    /// Card accent color as a CSS hex string.
    pub fn color(&self) -> &'static str {
        match self {
            Presence::Available => "#93c353",
            Presence::Away => "#fcd116",
            Presence::Busy | Presence::DoNotDisturb => "#c4314b",
            Presence::Offline | Presence::Error => "#9c9c9c",
        }
    }

    /// Path of the status icon asset served to the AR overlay.
    pub fn icon_ref(&self) -> &'static str {
        match self {
            Presence::Available => "/ar/assets/presence/ms-available.png",
            Presence::Away => "/ar/assets/presence/ms-away.png",
            Presence::Busy => "/ar/assets/presence/ms-busy.png",
            Presence::DoNotDisturb => "/ar/assets/presence/ms-dnd.png",
            Presence::Offline | Presence::Error => "/ar/assets/presence/ms-offline.png",
        }
    }
}

/// Aggregated presence card for one building occupant, scoped to the robot
/// whose overlay requested it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfficeCard {
    pub robot_id: String,
    pub user_id: String,
    pub display_name: String,
    pub presence_label: String,
    pub presence_color: String,
    pub icon_ref: String,
}

impl OfficeCard {
    /// Build a card from a classified presence and display name.
    pub fn new(robot_id: String, user_id: String, display_name: String, presence: Presence) -> Self {
        Self {
            robot_id,
            user_id,
            display_name,
            presence_label: presence.label().to_string(),
            presence_color: presence.color().to_string(),
            icon_ref: presence.icon_ref().to_string(),
        }
    }
}

/// Last-known telemetry reading for a robot session, replayed to drivers
/// who join after it was reported.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthSnapshot {
    pub kind: String,
    pub status: Value,
}
