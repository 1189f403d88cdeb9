use std::{
    fs::{File, OpenOptions, create_dir_all},
    io::{self, BufWriter, Write},
    path::Path,
    sync::{Arc, Mutex, Once},
};

use ethereum_types::H256;
use keccak_hash::keccak;
use statesnap_trie::Nibbles;

use crate::{
    error::PublishError,
    ipld,
    publisher::{BatchTx, Counters, HeaderRecord, Publisher, TrieNodeRecord, start_log_ticker},
};

/// File mode: the same records as the relational catalog, written as CSV
/// streams under an output directory. Rows are buffered per transaction and
/// appended on commit, so batches stay atomic per worker; the streams are
/// append-only and deduplicate nothing.
pub struct FilePublisher {
    sinks: Arc<Sinks>,
    counters: Arc<Counters>,
    ticker: Once,
}

struct Sinks {
    headers: Mutex<BufWriter<File>>,
    state: Mutex<BufWriter<File>>,
    storage: Mutex<BufWriter<File>>,
    blocks: Mutex<BufWriter<File>>,
}

impl FilePublisher {
    pub fn open(dir: &Path) -> Result<Self, PublishError> {
        create_dir_all(dir)?;
        Ok(Self {
            sinks: Arc::new(Sinks {
                headers: Mutex::new(open_csv(dir, "header_cids.csv")?),
                state: Mutex::new(open_csv(dir, "state_cids.csv")?),
                storage: Mutex::new(open_csv(dir, "storage_cids.csv")?),
                blocks: Mutex::new(open_csv(dir, "blocks.csv")?),
            }),
            counters: Arc::new(Counters::default()),
            ticker: Once::new(),
        })
    }
}

fn open_csv(dir: &Path, name: &str) -> Result<BufWriter<File>, PublishError> {
    let file = OpenOptions::new().create(true).append(true).open(dir.join(name))?;
    Ok(BufWriter::new(file))
}

fn append_rows(sink: &Mutex<BufWriter<File>>, rows: &[String]) -> Result<(), PublishError> {
    let mut writer = sink
        .lock()
        .map_err(|_| io::Error::other("poisoned csv writer lock"))?;
    for row in rows {
        writeln!(writer, "{row}")?;
    }
    writer.flush()?;
    Ok(())
}

impl Publisher for FilePublisher {
    fn publish_header(&self, record: &HeaderRecord<'_>) -> Result<i64, PublishError> {
        let header = record.header;
        let mh = ipld::keccak_multihash(header.hash);
        let mh_key = ipld::multihash_key(&mh);
        let cid = ipld::cid_string(ipld::MULTICODEC_ETH_HEADER, &mh);
        append_rows(
            &self.sinks.blocks,
            &[format!("{mh_key},{}", hex::encode(record.raw))],
        )?;
        append_rows(
            &self.sinks.headers,
            &[format!(
                "{},{:#x},{:#x},{cid},0,{},0,{:#x},{:#x},{:#x},{:#x},{},{},{mh_key},0",
                header.number,
                header.hash,
                header.parent_hash,
                record.node_id,
                header.state_root,
                header.tx_root,
                header.receipt_root,
                header.uncle_hash,
                hex::encode(&header.bloom),
                header.timestamp,
            )],
        )?;
        // File streams carry no row ids; records link by (header_id, path)
        // columns only.
        Ok(0)
    }

    fn begin_tx(&self) -> Result<Box<dyn BatchTx>, PublishError> {
        start_log_ticker(&self.ticker, &self.counters);
        Ok(Box::new(FileBatchTx {
            sinks: Arc::clone(&self.sinks),
            counters: Arc::clone(&self.counters),
            state_rows: Vec::new(),
            storage_rows: Vec::new(),
            block_rows: Vec::new(),
            batch_size: 0,
        }))
    }

    fn counters(&self) -> &Counters {
        &self.counters
    }
}

struct FileBatchTx {
    sinks: Arc<Sinks>,
    counters: Arc<Counters>,
    state_rows: Vec<String>,
    storage_rows: Vec<String>,
    block_rows: Vec<String>,
    batch_size: u32,
}

impl FileBatchTx {
    fn flush(&mut self) -> Result<(), PublishError> {
        append_rows(&self.sinks.blocks, &self.block_rows)?;
        append_rows(&self.sinks.state, &self.state_rows)?;
        append_rows(&self.sinks.storage, &self.storage_rows)?;
        self.block_rows.clear();
        self.state_rows.clear();
        self.storage_rows.clear();
        Ok(())
    }
}

impl BatchTx for FileBatchTx {
    fn publish_state_node(
        &mut self,
        header_id: i64,
        node: &TrieNodeRecord<'_>,
    ) -> Result<i64, PublishError> {
        let mh = ipld::keccak_multihash(keccak(node.value));
        let mh_key = ipld::multihash_key(&mh);
        let cid = ipld::cid_string(ipld::MULTICODEC_ETH_STATE_TRIE, &mh);
        self.block_rows
            .push(format!("{mh_key},{}", hex::encode(node.value)));
        self.state_rows.push(format!(
            "{header_id},{},{cid},{},{},false,{mh_key}",
            leaf_key_text(node.leaf_key),
            node.path,
            node.kind as i64,
        ));
        self.counters.count_state_node();
        self.batch_size += 2;
        Ok(0)
    }

    fn publish_storage_node(
        &mut self,
        header_id: i64,
        state_path: &Nibbles,
        node: &TrieNodeRecord<'_>,
    ) -> Result<(), PublishError> {
        let mh = ipld::keccak_multihash(keccak(node.value));
        let mh_key = ipld::multihash_key(&mh);
        let cid = ipld::cid_string(ipld::MULTICODEC_ETH_STORAGE_TRIE, &mh);
        self.block_rows
            .push(format!("{mh_key},{}", hex::encode(node.value)));
        self.storage_rows.push(format!(
            "{header_id},{state_path},{},{cid},{},{},false,{mh_key}",
            leaf_key_text(node.leaf_key),
            node.path,
            node.kind as i64,
        ));
        self.counters.count_storage_node();
        self.batch_size += 2;
        Ok(())
    }

    fn publish_code(&mut self, code_hash: H256, code: &[u8]) -> Result<(), PublishError> {
        let mh = ipld::keccak_multihash(code_hash);
        self.block_rows
            .push(format!("{},{}", ipld::multihash_key(&mh), hex::encode(code)));
        self.counters.count_code_blob();
        self.batch_size += 1;
        Ok(())
    }

    fn prepare_batch(&mut self, max_batch: u32) -> Result<(), PublishError> {
        if self.batch_size >= max_batch {
            self.flush()?;
            self.batch_size = 0;
        }
        Ok(())
    }

    fn commit(mut self: Box<Self>) -> Result<(), PublishError> {
        self.flush()
    }

    fn rollback(self: Box<Self>) -> Result<(), PublishError> {
        // Buffered rows are simply dropped.
        Ok(())
    }
}

fn leaf_key_text(leaf_key: Option<H256>) -> String {
    leaf_key.map(|key| format!("{key:#x}")).unwrap_or_default()
}
