//! blobtorrent - Main entry point
//!
//! Publishes and resolves image manifests through the tracker and the swarm.
//!
//! Each invocation joins a private in-process swarm of its own. Descriptors
//! are still published to the tracker, but `get` in a separate process only
//! succeeds when the manifest is already in this node's cache.

use anyhow::{Context, Result};
use blobtorrent::{
    CliArgs, Command, Config, ContentStore, FileStore, InfoHash, ManifestDistributor, MemorySwarm, TorrentClient,
    TorrentError,
};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Set up panic handler for unexpected errors
fn setup_panic_handler() {
    std::panic::set_hook(Box::new(|panic_info| {
        let backtrace = std::backtrace::Backtrace::capture();
        if let Some(location) = panic_info.location() {
            error!(
                "PANIC occurred at {}:{}:{}",
                location.file(),
                location.line(),
                location.column()
            );
        }
        let payload = panic_info.payload();
        if let Some(s) = payload.downcast_ref::<&str>() {
            error!("Panic message: {}", s);
        } else if let Some(s) = payload.downcast_ref::<String>() {
            error!("Panic message: {}", s);
        } else {
            error!("Panic message: unknown");
        }
        error!("Backtrace:\n{:?}", backtrace);
    }));
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_panic_handler();

    let args = CliArgs::parse_args();
    init_logging(&args);
    debug!("CLI arguments: {:?}", args);

    let config = Config::from_args(&args).context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    let store = Arc::new(
        FileStore::new(config.upload_dir(), config.download_dir(), config.cache_dir())
            .await
            .context("Failed to initialize content store")?,
    );
    let client = Arc::new(TorrentClient::new(&config, store.clone(), Arc::new(MemorySwarm::standalone()))?);
    let distributor = ManifestDistributor::new(&config, client.clone())?;

    let result = run(&args.command, &distributor, &store).await;

    if let Err(e) = client.close().await {
        error!("Failed to close torrent client: {}", e);
    }
    result
}

async fn run(command: &Command, distributor: &ManifestDistributor, store: &FileStore) -> Result<()> {
    match command {
        Command::Post { repository, tag, file } => {
            let local_name = stage_file(store, file).await?;
            let digest = distributor
                .post_manifest(repository, tag, &local_name)
                .await
                .with_context(|| format!("Failed to post {}:{}", repository, tag))?;
            println!("{}", digest);
        }
        Command::Get { repository, tag } => {
            let digest = distributor
                .get_manifest(repository, tag)
                .await
                .with_context(|| format!("Failed to get {}:{}", repository, tag))?;
            println!("{}", digest);
            info!("Manifest at {}", store.cache_file_path(digest.hex()).display());
        }
        Command::Status { info_hash: Some(info_hash) } => {
            let info_hash = InfoHash::from_hex(info_hash).context("Invalid info hash")?;
            print_status(distributor.client(), &info_hash).await?;
        }
        Command::Status { info_hash: None } => {
            let client = distributor.client();
            let archived = client.archived_torrents().await?;
            if archived.is_empty() {
                info!("No archived transfers");
            }
            for info_hash in &archived {
                if let Err(e) = print_status(client, info_hash).await {
                    error!("Failed to read status of {}: {}", info_hash, e);
                }
            }
        }
    }
    Ok(())
}

async fn print_status(client: &TorrentClient, info_hash: &InfoHash) -> Result<()> {
    let transfer = client
        .torrent(info_hash)
        .await?
        .ok_or_else(|| TorrentError::not_found(format!("no transfer for {}", info_hash)))?;
    let done = client.num_completed_pieces(&transfer).await?;
    let (complete, total) = client.is_completed(&transfer).await?;
    println!(
        "{} {} {}/{} pieces{}",
        info_hash,
        transfer.name(),
        done,
        total,
        if complete { " (complete)" } else { "" }
    );
    Ok(())
}

/// Copy a local file into the upload area, returning its staged name
async fn stage_file(store: &FileStore, path: &Path) -> Result<String> {
    let data = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| TorrentError::not_exist_with_path("not a file", path.display().to_string()))?;

    store.create_upload_file(&name).await?;
    store.append_upload_file(&name, &data).await?;
    debug!("Staged {} as '{}' ({} bytes)", path.display(), name, data.len());
    Ok(name)
}

/// Initialize logging based on CLI arguments
fn init_logging(args: &CliArgs) {
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(args.log_level())
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if args.verbose {
        subscriber.pretty().init();
    } else {
        subscriber.compact().init();
    }
}
