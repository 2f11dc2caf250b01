//! Tanod CLI - drive the session lifecycle from a terminal.
//!
//! `tanod boot` runs the bootstrap gate and prints every navigation root it
//! chooses; the other commands are the auth screens as one-shot commands.

mod commands;

use std::io;
use std::path::Path;

use anyhow::Result;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use tanod_core::{AppContext, Config};

// ============================================================================
// Constants
// ============================================================================

/// Log file prefix inside the data directory
const LOG_FILE_PREFIX: &str = "tanod.log";

const USAGE: &str = "\
Usage: tanod <command> [args]

Commands:
  boot                               Run the splash gate and follow auth changes
  whoami                             Show the resolved auth state
  login [email]                      Sign in (offers remembered credentials)
  register <first> <last> <email>    Create an account
  logout                             Sign out
  reset-password <email>             Send a password reset email
  update-password                    Change the signed-in user's password
  forget                             Clear remembered credentials";

/// Initialize the tracing subscriber for logging.
///
/// Stderr gets the `RUST_LOG` filter (default `warn`); when a data directory
/// is available a daily rolling file gets the same events.
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();
    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first().map(String::as_str) else {
        eprintln!("{USAGE}");
        std::process::exit(2);
    };
    if matches!(command, "-h" | "--help" | "help") {
        println!("{USAGE}");
        return Ok(());
    }

    let config = Config::load()?;
    let log_dir = config.data_dir().ok();
    let _log_guard = init_tracing(log_dir.as_deref());
    info!(command, "Tanod CLI starting");

    let ctx = AppContext::new(config)?;
    let rest = &args[1..];

    let result = match command {
        "boot" => commands::boot(&ctx).await,
        "whoami" => commands::whoami(&ctx).await,
        "login" => commands::login(&ctx, rest.first().map(String::as_str)).await,
        "register" => match rest {
            [first, last, email] => commands::register(&ctx, first, last, email).await,
            _ => Err(anyhow::anyhow!("register needs <first> <last> <email>")),
        },
        "logout" => commands::logout(&ctx).await,
        "reset-password" => match rest.first() {
            Some(email) => commands::reset_password(&ctx, email).await,
            None => Err(anyhow::anyhow!("reset-password needs <email>")),
        },
        "update-password" => commands::update_password(&ctx).await,
        "forget" => commands::forget(&ctx).await,
        other => {
            eprintln!("Unknown command: {other}\n\n{USAGE}");
            std::process::exit(2);
        }
    };

    ctx.shutdown();
    info!("Tanod CLI shutting down");
    result
}
