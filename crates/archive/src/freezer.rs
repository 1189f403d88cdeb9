use std::{fs::File, io::ErrorKind, os::unix::fs::FileExt, path::PathBuf};

use crate::ArchiveError;

/// Read access to geth's append-only "ancient" store.
///
/// A table is an index file of 6-byte entries (2-byte data-file number plus
/// 4-byte offset) and a series of numbered data files; consecutive index
/// entries delimit one item. Compressed tables (`.cidx`/`.cdat`) hold
/// snappy-framed items, raw tables (`.ridx`/`.rdat`) hold plain bytes.
pub struct Freezer {
    dir: PathBuf,
}

impl Freezer {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Reads entry `index` from `table`. Returns `None` when the table (or
    /// the whole freezer) does not reach that index; the caller falls back
    /// to the key/value store.
    pub fn read(
        &self,
        table: &str,
        compressed: bool,
        index: u64,
    ) -> Result<Option<Vec<u8>>, ArchiveError> {
        let idx_ext = if compressed { "cidx" } else { "ridx" };
        let index_file = match File::open(self.dir.join(format!("{table}.{idx_ext}"))) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        // Item i is delimited by index entries i and i+1.
        if index_file.metadata()?.len() < (index + 2) * 6 {
            return Ok(None);
        }
        let mut entries = [0u8; 12];
        index_file.read_exact_at(&mut entries, index * 6)?;
        let (first_file, first_offset) = parse_index_entry(&entries[..6]);
        let (data_file, end_offset) = parse_index_entry(&entries[6..]);

        // An item never spans data files; a file change means the item
        // starts at offset zero of the next file.
        let start_offset = if first_file != data_file { 0 } else { first_offset };
        if end_offset < start_offset {
            return Err(ArchiveError::CorruptIndex(table.to_string()));
        }

        let dat_ext = if compressed { "cdat" } else { "rdat" };
        let data = File::open(self.dir.join(format!("{table}.{data_file:04}.{dat_ext}")))?;
        let mut item = vec![0u8; (end_offset - start_offset) as usize];
        data.read_exact_at(&mut item, start_offset as u64)?;
        if compressed {
            item = snap::raw::Decoder::new().decompress_vec(&item)?;
        }
        Ok(Some(item))
    }
}

fn parse_index_entry(bytes: &[u8]) -> (u16, u32) {
    (
        u16::from_be_bytes([bytes[0], bytes[1]]),
        u32::from_be_bytes([bytes[2], bytes[3], bytes[4], bytes[5]]),
    )
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Write;

    fn write_table(dir: &std::path::Path, table: &str, items: &[&[u8]]) {
        let mut index = Vec::new();
        index.extend_from_slice(&[0u8; 6]);
        let mut data = Vec::new();
        for item in items {
            data.extend_from_slice(item);
            index.extend_from_slice(&0u16.to_be_bytes());
            index.extend_from_slice(&(data.len() as u32).to_be_bytes());
        }
        let mut f = std::fs::File::create(dir.join(format!("{table}.ridx"))).unwrap();
        f.write_all(&index).unwrap();
        let mut f = std::fs::File::create(dir.join(format!("{table}.0000.rdat"))).unwrap();
        f.write_all(&data).unwrap();
    }

    #[test]
    fn reads_raw_items() {
        let dir = tempfile::tempdir().unwrap();
        write_table(dir.path(), "hashes", &[b"first", b"second", b"third"]);
        let freezer = Freezer::new(dir.path());
        assert_eq!(
            freezer.read("hashes", false, 0).unwrap().as_deref(),
            Some(&b"first"[..])
        );
        assert_eq!(
            freezer.read("hashes", false, 2).unwrap().as_deref(),
            Some(&b"third"[..])
        );
        assert_eq!(freezer.read("hashes", false, 3).unwrap(), None);
    }

    #[test]
    fn missing_table_reads_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let freezer = Freezer::new(dir.path());
        assert_eq!(freezer.read("headers", true, 0).unwrap(), None);
    }
}
