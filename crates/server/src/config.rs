//! Server configuration, parsed from CLI flags with env fallbacks.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Clone, Parser)]
#[command(name = "roverlink")]
#[command(about = "Signaling and session relay for telepresence robots")]
pub struct Config {
    /// Address the server listens on.
    #[arg(long, env = "ROVERLINK_BIND", default_value = "0.0.0.0:4433")]
    pub bind: SocketAddr,

    /// Data directory (database, logs). Defaults to ~/.roverlink.
    #[arg(long, env = "ROVERLINK_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Base URL of the external directory API.
    #[arg(
        long,
        env = "ROVERLINK_DIRECTORY_BASE_URL",
        default_value = "https://graph.microsoft.com/v1.0"
    )]
    pub directory_base_url: String,

    /// Bearer token for the directory API. Presence cards degrade to an
    /// error state when absent.
    #[arg(long, env = "ROVERLINK_DIRECTORY_TOKEN", hide_env_values = true)]
    pub directory_token: Option<String>,

    /// PEM certificate for TLS. Both --tls-cert and --tls-key must be set
    /// to serve HTTPS; otherwise the server speaks plain TCP.
    #[arg(long, env = "ROVERLINK_TLS_CERT", requires = "tls_key")]
    pub tls_cert: Option<PathBuf>,

    /// PEM private key for TLS.
    #[arg(long, env = "ROVERLINK_TLS_KEY", requires = "tls_cert")]
    pub tls_key: Option<PathBuf>,
}
