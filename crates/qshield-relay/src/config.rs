//! Relay configuration from CLI arguments and the environment.

use anyhow::{bail, Result};
use clap::Parser;

/// Environment variable holding the token-signing secret.
pub const TOKEN_SECRET_ENV: &str = "QSHIELD_TOKEN_SECRET";

/// QuantumShield relay - realtime encrypted message bus
#[derive(Parser, Debug)]
#[command(name = "qshield-relay")]
#[command(author, version, about)]
pub struct Args {
    /// Listen address
    #[arg(short, long, default_value = "127.0.0.1:8443")]
    pub listen: String,

    /// Path to the user/friendship database
    #[arg(long, default_value = "qshield.db")]
    pub database: String,

    /// Comma-separated origin allowlist for browser clients
    #[arg(long, value_delimiter = ',', default_value = "http://localhost:5173")]
    pub allowed_origins: Vec<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

/// Resolved relay configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Listen address.
    pub listen: String,
    /// Database path.
    pub database: String,
    /// Origin allowlist.
    pub allowed_origins: Vec<String>,
    /// Token-signing secret shared with the auth endpoint.
    pub token_secret: Vec<u8>,
    /// Verbose logging flag.
    pub verbose: bool,
}

impl Config {
    /// Combine CLI args with the environment.
    ///
    /// A missing or empty signing secret is fatal: the relay cannot
    /// authenticate anyone without it, so it refuses to start.
    pub fn load(args: Args) -> Result<Self> {
        let token_secret = match std::env::var(TOKEN_SECRET_ENV) {
            Ok(secret) if !secret.is_empty() => secret.into_bytes(),
            _ => bail!("{TOKEN_SECRET_ENV} is not set; refusing to start"),
        };

        if args.database.is_empty() {
            bail!("database path is empty; refusing to start");
        }

        Ok(Self {
            listen: args.listen,
            database: args.database,
            allowed_origins: args.allowed_origins,
            token_secret,
            verbose: args.verbose,
        })
    }
}
