//! Record-store adapter — robots and smart actions.
//!
//! The store is consumed as a plain lookup/update service: reads are async
//! helpers over `spawn_blocking`, and every mutation flows through a single
//! writer task so concurrent admin updates cannot race each other. Uses
//! SQLite under the hood; schema is created on open.

use std::path::{Path, PathBuf};

use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// A provisioned robot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RobotRecord {
    /// Public identity: base64(SHA-256(private_token)).
    pub id: String,
    pub private_token: String,
    pub name: String,
    pub location: String,
}

/// A configured smart action: fiducial marker → webhook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmartAction {
    pub id: String,
    pub name: String,
    pub webhook: String,
}

/// Mutations applied by the single writer task.
#[derive(Debug, Clone)]
pub enum StoreCommand {
    UpsertRobot { robot: RobotRecord },
    DeleteRobot { id: String },
    UpsertAction { action: SmartAction },
    DeleteAction { id: String },
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("store task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Cheap-to-clone handle for reads and enqueueing mutations.
#[derive(Clone)]
pub struct Store {
    db_path: PathBuf,
    tx: mpsc::Sender<StoreCommand>,
}

impl Store {
    /// Create a store handle plus its writer. The writer must be spawned
    /// (`tokio::spawn(writer.run())`) for mutations to apply.
    pub fn open(db_path: impl Into<PathBuf>) -> (Store, StoreWriter) {
        let db_path = db_path.into();
        let (tx, rx) = mpsc::channel(256);
        let store = Store {
            db_path: db_path.clone(),
            tx,
        };
        (store, StoreWriter { rx, db_path })
    }

    /// Enqueue a mutation for the writer task.
    pub async fn apply(&self, cmd: StoreCommand) {
        if self.tx.send(cmd).await.is_err() {
            warn!(
                component = "store",
                event = "store.writer_gone",
                "Store writer task is gone, mutation dropped"
            );
        }
    }

    /// Look up a smart action by id.
    pub async fn action(&self, id: &str) -> Result<Option<SmartAction>, StoreError> {
        let db_path = self.db_path.clone();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = open_connection(&db_path)?;
            conn.query_row(
                "SELECT id, name, webhook FROM smart_actions WHERE id = ?1",
                params![id],
                |row| {
                    Ok(SmartAction {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        webhook: row.get(2)?,
                    })
                },
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await?
    }

    /// Look up a robot by its public identity.
    pub async fn robot(&self, id: &str) -> Result<Option<RobotRecord>, StoreError> {
        let db_path = self.db_path.clone();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = open_connection(&db_path)?;
            conn.query_row(
                "SELECT id, private_token, name, location FROM robots WHERE id = ?1",
                params![id],
                |row| {
                    Ok(RobotRecord {
                        id: row.get(0)?,
                        private_token: row.get(1)?,
                        name: row.get(2)?,
                        location: row.get(3)?,
                    })
                },
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await?
    }

    /// All provisioned robots (admin/selection views).
    pub async fn robots(&self) -> Result<Vec<RobotRecord>, StoreError> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let conn = open_connection(&db_path)?;
            let mut stmt =
                conn.prepare("SELECT id, private_token, name, location FROM robots ORDER BY name")?;
            let rows = stmt.query_map([], |row| {
                Ok(RobotRecord {
                    id: row.get(0)?,
                    private_token: row.get(1)?,
                    name: row.get(2)?,
                    location: row.get(3)?,
                })
            })?;
            rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
        })
        .await?
    }
}

fn open_connection(db_path: &Path) -> Result<Connection, StoreError> {
    if let Some(parent) = db_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let conn = Connection::open(db_path)?;
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS robots (
            id            TEXT PRIMARY KEY,
            private_token TEXT NOT NULL UNIQUE,
            name          TEXT NOT NULL,
            location      TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS smart_actions (
            id      TEXT PRIMARY KEY,
            name    TEXT NOT NULL,
            webhook TEXT NOT NULL
        );",
    )?;
    Ok(conn)
}

/// Single writer task draining the mutation queue.
pub struct StoreWriter {
    rx: mpsc::Receiver<StoreCommand>,
    db_path: PathBuf,
}

impl StoreWriter {
    pub async fn run(mut self) {
        info!(
            component = "store",
            event = "store.writer_started",
            db_path = %self.db_path.display(),
            "Store writer started"
        );

        while let Some(cmd) = self.rx.recv().await {
            let db_path = self.db_path.clone();
            let result = tokio::task::spawn_blocking(move || {
                let conn = open_connection(&db_path)?;
                apply_command(&conn, cmd)
            })
            .await;

            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(
                        component = "store",
                        event = "store.write_failed",
                        error = %e,
                        "Store mutation failed"
                    );
                }
                Err(e) => {
                    error!(
                        component = "store",
                        event = "store.write_panicked",
                        error = %e,
                        "Store mutation task panicked"
                    );
                }
            }
        }
    }
}

fn apply_command(conn: &Connection, cmd: StoreCommand) -> Result<(), StoreError> {
    match cmd {
        StoreCommand::UpsertRobot { robot } => {
            conn.execute(
                "INSERT INTO robots (id, private_token, name, location)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(id) DO UPDATE SET
                     private_token = excluded.private_token,
                     name = excluded.name,
                     location = excluded.location",
                params![robot.id, robot.private_token, robot.name, robot.location],
            )?;
        }
        StoreCommand::DeleteRobot { id } => {
            conn.execute("DELETE FROM robots WHERE id = ?1", params![id])?;
        }
        StoreCommand::UpsertAction { action } => {
            conn.execute(
                "INSERT INTO smart_actions (id, name, webhook)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(id) DO UPDATE SET
                     name = excluded.name,
                     webhook = excluded.webhook",
                params![action.id, action.name, action.webhook],
            )?;
        }
        StoreCommand::DeleteAction { id } => {
            conn.execute("DELETE FROM smart_actions WHERE id = ?1", params![id])?;
        }
    }
    Ok(())
}
