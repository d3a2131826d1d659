mod calc;
mod db;
mod ipc;

use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use clap::Parser;
use serde_json::json;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Grade-book aggregation sidecar speaking JSON lines over stdio.
#[derive(Parser, Debug)]
#[command(name = "gradebookd")]
#[command(version)]
struct Args {
    /// Workspace directory to open at startup
    #[arg(short, long, env = "GRADEBOOKD_WORKSPACE")]
    workspace: Option<PathBuf>,
}

fn main() {
    // stdout carries responses only; logs go to stderr.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_env("GRADEBOOKD_LOG")
                .unwrap_or_else(|_| "gradebookd=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let args = Args::parse();
    let mut state = ipc::AppState::default();
    if let Some(path) = args.workspace.as_deref() {
        if let Err(e) = ipc::select_workspace(&mut state, path) {
            tracing::error!(workspace = %path.display(), "failed to open workspace: {e:#}");
        }
    }

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(_) => break,
        };
        if line.trim().is_empty() {
            continue;
        }

        let resp = match serde_json::from_str::<ipc::Request>(&line) {
            Ok(req) => ipc::handle_request(&mut state, req),
            Err(e) => {
                // No id to echo back.
                tracing::warn!("dropping malformed request: {e}");
                json!({ "ok": false, "error": { "code": "bad_json", "message": e.to_string() } })
            }
        };
        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }
    tracing::debug!("stdin closed, shutting down");
}
