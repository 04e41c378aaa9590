//! TCP server for the Xtrieve storage engine.
//!
//! Binds a listener, builds an [`Engine`] over a data directory, and runs
//! the accept loop from the `server` library until Ctrl+C.

use anyhow::Result;
use clap::Parser;
use common::EngineConfig;
use engine::Engine;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 5912;
const DEFAULT_DATA_DIR: &str = "./xtrieve_data";
const DEFAULT_BUFFER_PAGES: usize = 256;

#[derive(Parser, Debug)]
#[command(name = "xtrieved", about = "TCP server for the Xtrieve storage engine")]
struct Args {
    /// Host address to bind to
    #[arg(long, default_value = DEFAULT_HOST)]
    host: String,

    /// Port to listen on
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Directory holding `.xtr` data files, created if missing
    #[arg(long, default_value = DEFAULT_DATA_DIR)]
    data_dir: PathBuf,

    /// Number of pages each open file's cache keeps resident
    #[arg(long, default_value_t = DEFAULT_BUFFER_PAGES)]
    buffer_pool_pages: usize,

    /// Skip fsync on commit, trading durability for throughput
    #[arg(long)]
    no_fsync: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    std::fs::create_dir_all(&args.data_dir)?;

    let config = EngineConfig::builder()
        .data_dir(args.data_dir.clone())
        .buffer_pool_pages(args.buffer_pool_pages)
        .fsync_on_commit(!args.no_fsync)
        .build();
    let engine = Arc::new(Engine::new(&config));

    let addr = format!("{}:{}", args.host, args.port);
    let listener = TcpListener::bind(&addr).await?;

    log::info!("listening on {addr}");
    log::info!("data directory: {:?}", args.data_dir);
    log::info!("buffer pool: {} pages per file", args.buffer_pool_pages);

    let server_task = tokio::spawn(server::run(listener, engine));

    signal::ctrl_c().await?;
    log::info!("shutdown signal received, stopping server");
    server_task.abort();

    Ok(())
}
