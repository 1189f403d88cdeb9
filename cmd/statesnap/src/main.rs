mod cli;

use clap::Parser;
use statesnap_archive::ArchiveDb;
use statesnap_snapshot::{
    FilePublisher, Publisher, Service, SnapshotMode, SnapshotParams, SqlitePublisher,
    default_recovery_file,
};
use tracing::info;
use tracing_subscriber::{EnvFilter, filter::Directive};

use crate::cli::Cli;

fn main() -> eyre::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli);

    if cli.workers == 0 {
        eyre::bail!("--workers must be positive");
    }

    info!(
        "opening chaindata and ancient store at {} and {}",
        cli.leveldb_path.display(),
        cli.ancient_path.display(),
    );
    let archive = ArchiveDb::open(&cli.leveldb_path, &cli.ancient_path)?;

    let publisher: Box<dyn Publisher> = match cli.snapshot_mode {
        SnapshotMode::Sqlite => Box::new(SqlitePublisher::open(&cli.database_path)?),
        SnapshotMode::File => {
            let dir = cli
                .output_dir
                .as_deref()
                .ok_or_else(|| eyre::eyre!("--output-dir is required in file mode"))?;
            Box::new(FilePublisher::open(dir)?)
        }
    };

    let recovery_file = cli
        .recovery_file
        .clone()
        .unwrap_or_else(|| default_recovery_file(cli.block_height));
    let service = Service::new(&archive, publisher.as_ref(), recovery_file)
        .with_batch_size(cli.batch_size);

    if cli.block_height < 0 {
        service.create_latest_snapshot(cli.workers, cli.watched_addresses.clone())?;
    } else {
        service.create_snapshot(&SnapshotParams {
            height: Some(cli.block_height as u64),
            workers: cli.workers,
            watched_addresses: cli.watched_addresses.clone(),
        })?;
    }

    info!("state snapshot at height {} complete", cli.block_height);
    Ok(())
}

fn init_tracing(cli: &Cli) {
    let filter = EnvFilter::builder()
        .with_default_directive(Directive::from(cli.log_level))
        .from_env_lossy();
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
