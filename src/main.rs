use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
mod auth;
use kdbcrypt::{CancelToken, Credentials, Unlocker};
use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use zeroize::Zeroizing;

fn resolve_db(path: Option<PathBuf>) -> Result<PathBuf> {
    match path {
        Some(p) => Ok(p),
        None => bail!("no database given; pass --db or set KDBCRYPT_DB"),
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

#[derive(Debug, Parser)]
#[command(name = "kdbcrypt")]
#[command(version, about = "Identify and unlock KeePass database files.")]
struct Cli {
    /// Path to the database file
    #[arg(long, global = true, value_name = "PATH", env = "KDBCRYPT_DB")]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Prints the detected database format
    Identify,

    /// Shows the plaintext header fields
    Info {
        /// Print the header as JSON
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Decrypts the database payload
    Decrypt {
        /// Key file used together with (or instead of) the password
        #[arg(long, value_name = "PATH", env = "KDBCRYPT_KEY_FILE")]
        key_file: Option<PathBuf>,

        /// Do not ask for a password; unlock with the key file only
        #[arg(long, default_value_t = false)]
        no_password: bool,

        /// Write the payload to this file instead of stdout
        #[arg(short, long, value_name = "PATH")]
        out: Option<PathBuf>,

        /// Skip the format's integrity check after decryption
        #[arg(long, default_value_t = false)]
        no_verify: bool,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    init_tracing();

    let args = Cli::parse();
    let db = resolve_db(args.db)?;

    match args.command {
        Commands::Identify => {
            let format = kdbcrypt::identify(&db)?;
            println!("{format}");
        }
        Commands::Info { json } => {
            let info = kdbcrypt::inspect(&db)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&info)?);
            } else {
                println!("{info}");
            }
        }
        Commands::Decrypt {
            key_file,
            no_password,
            out,
            no_verify,
        } => {
            let mut credentials = Credentials::new();
            if !no_password {
                let password = auth::read_password()?;
                credentials = credentials.with_password(password.as_bytes());
            }
            if let Some(path) = key_file {
                credentials = credentials.with_key_file_path(path)?;
            }

            let token = CancelToken::new();
            let handler_token = token.clone();
            ctrlc::set_handler(move || handler_token.cancel())?;

            let payload = Unlocker::with_cancel(token)
                .verify(!no_verify)
                .open(&db, &credentials, |db| {
                    Ok(Zeroizing::new(db.payload().to_vec()))
                })?;

            match out {
                Some(path) => {
                    fs::write(&path, &payload[..])
                        .with_context(|| format!("failed to write {}", path.display()))?;
                    println!("payload written to {}", path.display());
                }
                None => io::stdout().write_all(&payload)?,
            }
        }
    }

    Ok(())
}
