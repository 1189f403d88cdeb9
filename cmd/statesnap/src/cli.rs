use std::path::PathBuf;

use clap::Parser;
use ethereum_types::Address;
use statesnap_snapshot::SnapshotMode;
use tracing::Level;

#[derive(Parser)]
#[command(
    name = "statesnap",
    version,
    about = "Extract an Ethereum world-state snapshot from an archive node database \
             and publish it into a content-addressed catalog"
)]
pub struct Cli {
    #[arg(
        long = "leveldb-path",
        value_name = "PATH",
        help = "geth chaindata directory"
    )]
    pub leveldb_path: PathBuf,
    #[arg(
        long = "ancient-path",
        value_name = "PATH",
        help = "geth ancient (freezer) directory"
    )]
    pub ancient_path: PathBuf,
    #[arg(
        long = "block-height",
        default_value_t = -1,
        value_name = "HEIGHT",
        help = "Block height to snapshot; negative selects the chain head"
    )]
    pub block_height: i64,
    #[arg(long = "workers", default_value_t = 1, value_name = "COUNT")]
    pub workers: usize,
    #[arg(
        long = "recovery-file",
        value_name = "PATH",
        help = "File to resume an interrupted run from; defaults to ./<height>_snapshot_recovery"
    )]
    pub recovery_file: Option<PathBuf>,
    #[arg(
        long = "snapshot-mode",
        default_value = "sqlite",
        value_name = "MODE",
        value_parser = parse_mode,
        help = "Has to be `sqlite` or `file`"
    )]
    pub snapshot_mode: SnapshotMode,
    #[arg(
        long = "database-path",
        default_value = "./snapshot.db",
        value_name = "PATH",
        help = "Catalog location in sqlite mode"
    )]
    pub database_path: PathBuf,
    #[arg(
        long = "output-dir",
        value_name = "DIR",
        help = "Directory for the CSV streams in file mode"
    )]
    pub output_dir: Option<PathBuf>,
    #[arg(
        long = "watched-addresses",
        value_name = "ADDRESSES",
        value_delimiter = ',',
        num_args = 0..,
        value_parser = parse_address,
        help = "Restrict the snapshot to these accounts"
    )]
    pub watched_addresses: Vec<Address>,
    #[arg(long = "batch-size", default_value_t = 100, value_name = "RECORDS")]
    pub batch_size: u32,
    #[arg(long = "log.level", default_value_t = Level::INFO, value_name = "LOG_LEVEL")]
    pub log_level: Level,
}

fn parse_mode(value: &str) -> Result<SnapshotMode, String> {
    match value {
        "sqlite" => Ok(SnapshotMode::Sqlite),
        "file" => Ok(SnapshotMode::File),
        other => Err(format!("unknown snapshot mode '{other}'")),
    }
}

fn parse_address(value: &str) -> Result<Address, String> {
    value
        .trim_start_matches("0x")
        .parse::<Address>()
        .map_err(|err| format!("invalid address '{value}': {err}"))
}
