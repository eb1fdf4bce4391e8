//! The `tavern` command: plays the game master in the terminal or serves
//! the web chat.

#[macro_use]
extern crate tracing;

mod cli;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tavern::SessionFactory;
use tavern::config::AppConfig;
use tavern::repl::run_repl;
use tavern::web::{self, WebApp};
use tokio::io::{self, BufReader};
use tokio::net::TcpListener;
use tokio::runtime;

use crate::cli::{Cli, Command};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let credentials = cli.command.credentials();
    let config = AppConfig::from(cli.options);
    let factory = SessionFactory::from_config(&config)
        .context("failed to set up the game master")?;

    match cli.command {
        Command::Repl => runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("failed to start the runtime")?
            .block_on(repl(factory)),
        Command::Web { addr, .. } => runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .context("failed to start the runtime")?
            .block_on(async move {
                let listener = TcpListener::bind(addr)
                    .await
                    .with_context(|| format!("failed to bind {addr}"))?;
                let app = WebApp::new(Arc::new(factory), credentials);
                web::serve(app, listener, shutdown_signal())
                    .await
                    .context("web server failed")
            }),
    }
}

async fn repl(factory: SessionFactory) -> Result<()> {
    let session = factory.start();
    let stdin = BufReader::new(io::stdin());
    run_repl(session, stdin, std::io::stdout(), shutdown_signal())
        .await
        .context("terminal i/o failed")
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("failed to listen for ctrl-c: {err}");
        std::future::pending::<()>().await;
    }
    info!("interrupted");
}
