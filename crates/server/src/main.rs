//! Roverlink Server
//!
//! Signaling and session relay for telepresence robots: brokers WebRTC
//! sessions between drivers and robots, relays control/telemetry/click
//! events, dispatches smart-action webhooks, and serves directory presence
//! cards.

mod config;
mod coordinator;
mod crypto;
mod directory;
mod dispatch;
mod logging;
mod paths;
mod registry;
mod relay;
mod rooms;
mod state;
mod store;
mod websocket;

use std::sync::Arc;

use arc_swap::ArcSwap;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use axum_server::tls_rustls::RustlsConfig;
use clap::Parser;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::config::Config;
use crate::coordinator::{Coordinator, CoordinatorHandle};
use crate::directory::{DirectoryAdapter, GraphDirectory};
use crate::dispatch::ActionDispatcher;
use crate::state::AppState;
use crate::store::{RobotRecord, SmartAction, Store, StoreCommand};
use crate::websocket::ws_handler;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();
    paths::init_data_dir(config.data_dir.as_deref());
    let logging_handle = logging::init_logging()?;

    info!(
        component = "server",
        event = "server.starting",
        run_id = %logging_handle.run_id,
        "Starting Roverlink server"
    );

    // Record store: single writer, async readers
    let (store, store_writer) = Store::open(paths::db_path());
    tokio::spawn(store_writer.run());

    // Coordinator loop and its collaborators
    let (event_tx, event_rx) = mpsc::channel(1024);
    let coordinator_handle = CoordinatorHandle::new(event_tx.clone());

    let directory_api = Arc::new(GraphDirectory::new(
        config.directory_base_url.clone(),
        config.directory_token.clone(),
    ));
    let directory = DirectoryAdapter::new(directory_api, event_tx);
    let dispatcher = ActionDispatcher::new(store.clone());
    let active_robots = Arc::new(ArcSwap::from_pointee(Vec::new()));

    let coordinator = Coordinator::new(event_rx, dispatcher, directory, active_robots.clone());
    tokio::spawn(coordinator.run());

    let app_state = Arc::new(AppState::new(coordinator_handle, active_robots, store));

    // Build router
    let app = Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .route("/robots", get(robots_handler))
        .route("/robot/{token}", get(robot_resolve_handler))
        .route("/fleet", get(fleet_handler).post(add_robot_handler))
        .route("/fleet/{id}", delete(delete_robot_handler))
        .route("/actions", post(add_action_handler))
        .route("/actions/{id}", delete(delete_action_handler))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(app_state);

    info!(
        component = "server",
        event = "server.listening",
        addr = %config.bind,
        tls = config.tls_cert.is_some(),
        "Listening"
    );

    match (&config.tls_cert, &config.tls_key) {
        (Some(cert), Some(key)) => {
            let tls = RustlsConfig::from_pem_file(cert, key).await?;
            axum_server::bind_rustls(config.bind, tls)
                .serve(app.into_make_service())
                .await?;
        }
        _ => {
            let listener = tokio::net::TcpListener::bind(config.bind).await?;
            axum::serve(listener, app).await?;
        }
    }

    Ok(())
}

async fn health_handler() -> impl IntoResponse {
    "OK"
}

/// Live robot identities, for the selection/presence view.
async fn robots_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.active_robots())
}

/// Resolve a robot's private token to its public identity card. The
/// robot-side client bootstraps from this before announcing itself; only
/// the hashed identity ever reaches drivers.
async fn robot_resolve_handler(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
) -> Result<impl IntoResponse, StatusCode> {
    match state.store().robot(&crypto::robot_identity(&token)).await {
        Ok(Some(robot)) => Ok(Json(json!({
            "robotId": robot.id,
            "name": robot.name,
            "location": robot.location,
        }))),
        Ok(None) => Err(StatusCode::NOT_FOUND),
        Err(e) => {
            error!(
                component = "server",
                event = "robot.resolve_failed",
                error = %e,
                "Robot token resolution failed"
            );
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// Provisioned robots (without private tokens), for admin views.
async fn fleet_handler(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, StatusCode> {
    match state.store().robots().await {
        Ok(robots) => Ok(Json(
            robots
                .into_iter()
                .map(|r| {
                    json!({
                        "robotId": r.id,
                        "name": r.name,
                        "location": r.location,
                    })
                })
                .collect::<Vec<_>>(),
        )),
        Err(e) => {
            error!(
                component = "server",
                event = "fleet.list_failed",
                error = %e,
                "Fleet listing failed"
            );
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

#[derive(Deserialize)]
struct AddRobotBody {
    name: String,
    location: String,
}

/// Provision a new robot: mint a private token, derive its public
/// identity, store the record. The token is returned exactly once.
async fn add_robot_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<AddRobotBody>,
) -> impl IntoResponse {
    let token = crypto::new_private_token();
    let robot = RobotRecord {
        id: crypto::robot_identity(&token),
        private_token: token.clone(),
        name: body.name,
        location: body.location,
    };
    state
        .store()
        .apply(StoreCommand::UpsertRobot {
            robot: robot.clone(),
        })
        .await;

    info!(
        component = "server",
        event = "robot.provisioned",
        robot_id = %robot.id,
        "Robot provisioned"
    );
    Json(json!({
        "robotId": robot.id,
        "token": token,
        "name": robot.name,
        "location": robot.location,
    }))
}

async fn delete_robot_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> StatusCode {
    state.store().apply(StoreCommand::DeleteRobot { id }).await;
    StatusCode::NO_CONTENT
}

#[derive(Deserialize)]
struct AddActionBody {
    name: String,
    webhook: String,
}

/// Configure a new smart action (fiducial marker → webhook mapping).
async fn add_action_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<AddActionBody>,
) -> impl IntoResponse {
    let action = SmartAction {
        id: roverlink_protocol::new_id(),
        name: body.name,
        webhook: body.webhook,
    };
    state
        .store()
        .apply(StoreCommand::UpsertAction {
            action: action.clone(),
        })
        .await;

    Json(json!({
        "actionId": action.id,
        "name": action.name,
        "webhook": action.webhook,
    }))
}

async fn delete_action_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> StatusCode {
    state.store().apply(StoreCommand::DeleteAction { id }).await;
    StatusCode::NO_CONTENT
}
