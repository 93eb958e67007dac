//! CLI command definitions

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "vigil")]
#[command(about = "Authenticated real-time feed gateway", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Log filter (overridden by RUST_LOG)
    #[arg(long, default_value = "info", global = true)]
    pub log_level: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the gateway
    Serve {
        /// Address to bind to
        #[arg(short, long, default_value = "0.0.0.0:8080", env = "VIGIL_BIND")]
        bind: String,

        /// Token signing secret (at least 32 bytes)
        #[arg(long, env = "VIGIL_SECRET", hide_env_values = true)]
        secret: String,

        /// Path to the credentials file (JSON)
        #[arg(long, env = "VIGIL_CREDENTIALS")]
        credentials: PathBuf,

        /// Seconds a single push may take before the stream is dropped
        #[arg(long, default_value_t = 10, env = "VIGIL_WRITE_TIMEOUT_SECS")]
        write_timeout_secs: u64,
    },

    /// Hash a password for the credentials file
    ///
    /// Example:
    ///   vigil hash-password 's3cret'
    HashPassword {
        /// Password to hash
        password: String,
    },

    /// Mint a token directly, bypassing login
    ///
    /// Example:
    ///   vigil issue-token --sub u-1 --username admin --role admin
    IssueToken {
        /// Token signing secret
        #[arg(long, env = "VIGIL_SECRET", hide_env_values = true)]
        secret: String,

        /// Subject (identity id)
        #[arg(long)]
        sub: String,

        #[arg(long)]
        username: String,

        #[arg(long)]
        role: String,
    },
}
