//! # wotdir - Thing Description Directory
//!
//! The main binary for the WoT Thing Description directory.
//!
//! This application provides:
//! - HTTP REST API server (axum-based) with a Server-Sent Events change feed
//! - CLI interface for store maintenance
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                 apps/wotdir (THE BINARY)                │
//! │                                                         │
//! │   ┌─────────────┐            ┌──────────────────────┐   │
//! │   │    CLI      │            │  HTTP API + SSE      │   │
//! │   │   (clap)    │            │      (axum)          │   │
//! │   └──────┬──────┘            └──────────┬───────────┘   │
//! │          └─────────────┬────────────────┘               │
//! │                        ▼                                │
//! │                ┌───────────────┐                        │
//! │                │  wotdir-core  │                        │
//! │                │  (Directory)  │                        │
//! │                └───────────────┘                        │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! # Start the HTTP server
//! wotdir server --host 0.0.0.0 --port 8081
//!
//! # CLI operations
//! wotdir status
//! wotdir export -o things.nt
//! wotdir rebuild
//! ```

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use wotdir::cli;

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

#[tokio::main]
async fn main() {
    // WOTDIR_LOG_FORMAT=json enables machine-parseable output.
    let log_format = std::env::var("WOTDIR_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "wotdir=info,wotdir_core=info,tower_http=debug".into());

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }

    let cli = cli::Cli::parse();

    if !cli.quiet && !cli.json_mode {
        print_banner();
    }

    if let Err(e) = cli::execute(cli).await {
        tracing::error!(kind = e.kind(), "Error: {}", e);
        std::process::exit(1);
    }
}

fn print_banner() {
    println!(
        r#"
  __      __   _   ___  _
  \ \    / /__| |_|   \(_)_ _
   \ \/\/ / _ \  _| |) | | '_|
    \_/\_/\___/\__|___/|_|_|

  Thing Description Directory v{}
"#,
        env!("CARGO_PKG_VERSION")
    );
}
