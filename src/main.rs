//! Code Assistance Service
//!
//! Serves one language backend on a local socket. Clients talk JSON-RPC over
//! the socket; the process exits once the last client session is gone unless
//! started with `--persist`.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tokio::sync::{mpsc, watch};

use codeassist::backend::BackendDescriptor;
use codeassist::bus::ObjectTable;
use codeassist::languages;
use codeassist::server::{Server, ServerConfig};
use codeassist::transport::Transport;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Language backend to serve, e.g. `css`.
    #[arg(required_unless_present = "list")]
    language: Option<String>,

    /// Socket to listen on. Defaults to `$XDG_RUNTIME_DIR/codeassist/<language>.sock`.
    #[arg(long)]
    socket: Option<PathBuf>,

    /// Keep running after the last client has left.
    #[arg(long)]
    persist: bool,

    /// Print the built-in languages and exit.
    #[arg(long)]
    list: bool,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    if args.list {
        for descriptor in languages::BUILTIN {
            println!("{}", descriptor.language);
        }
        return Ok(());
    }

    let language = args.language.as_deref().context("no language given")?;
    let descriptor = languages::lookup(language)
        .with_context(|| format!("unknown language `{language}`, see --list"))?;
    let socket = args
        .socket
        .clone()
        .unwrap_or_else(|| default_socket(language));

    // Everything runs on one thread; the event loop owns all service state.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(serve(descriptor, socket, args.persist))
}

async fn serve(
    descriptor: &'static BackendDescriptor,
    socket: PathBuf,
    persist: bool,
) -> anyhow::Result<()> {
    log::info!("Starting {} code assistance service...", descriptor.language);

    let config = ServerConfig::from_current_dir()?;
    let mut server = Server::new(descriptor, Box::new(ObjectTable::new()), config)?;

    let (quit_tx, mut quit_rx) = watch::channel(false);
    if !persist {
        let quit = quit_tx.clone();
        server.on_empty(move || {
            let _ = quit.send(true);
        });
    }

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let transport = Transport::bind(&socket, events_tx)
        .with_context(|| format!("failed to listen on {}", socket.display()))?;

    tokio::select! {
        _ = server.run(events_rx) => log::info!("Event stream ended"),
        _ = quit_rx.wait_for(|quit| *quit) => log::info!("Last client left, shutting down"),
        interrupted = tokio::signal::ctrl_c() => {
            interrupted?;
            log::info!("Interrupted, shutting down");
        }
    }

    transport.close().await;
    Ok(())
}

fn default_socket(language: &str) -> PathBuf {
    std::env::var_os("XDG_RUNTIME_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(std::env::temp_dir)
        .join("codeassist")
        .join(format!("{language}.sock"))
}
