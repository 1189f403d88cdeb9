mod db;
mod error;
mod freezer;
mod types;

pub use self::db::ArchiveDb;
pub use self::error::ArchiveError;
pub use self::freezer::Freezer;
pub use self::types::{AccountState, BlockHeader, EMPTY_CODE_HASH};
