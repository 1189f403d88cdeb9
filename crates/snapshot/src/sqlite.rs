use std::{
    path::PathBuf,
    sync::{Arc, Once},
    time::Duration,
};

use ethereum_types::H256;
use keccak_hash::keccak;
use rusqlite::{Connection, params};
use statesnap_trie::Nibbles;

use crate::{
    error::PublishError,
    ipld,
    publisher::{BatchTx, Counters, HeaderRecord, Publisher, TrieNodeRecord, start_log_ticker},
};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS header_cids (
    id INTEGER PRIMARY KEY,
    block_number INTEGER NOT NULL,
    block_hash TEXT NOT NULL,
    parent_hash TEXT NOT NULL,
    cid TEXT NOT NULL,
    td TEXT NOT NULL,
    node_id TEXT NOT NULL,
    reward TEXT NOT NULL,
    state_root TEXT NOT NULL,
    tx_root TEXT NOT NULL,
    receipt_root TEXT NOT NULL,
    uncle_root TEXT NOT NULL,
    bloom BLOB NOT NULL,
    timestamp INTEGER NOT NULL,
    mh_key TEXT NOT NULL,
    times_validated INTEGER NOT NULL DEFAULT 0,
    UNIQUE (block_number, block_hash)
);
CREATE TABLE IF NOT EXISTS state_cids (
    id INTEGER PRIMARY KEY,
    header_id INTEGER NOT NULL REFERENCES header_cids (id),
    state_leaf_key TEXT NOT NULL,
    cid TEXT NOT NULL,
    state_path BLOB NOT NULL,
    node_type INTEGER NOT NULL,
    diff INTEGER NOT NULL DEFAULT 0,
    mh_key TEXT NOT NULL,
    UNIQUE (header_id, state_path)
);
CREATE TABLE IF NOT EXISTS storage_cids (
    id INTEGER PRIMARY KEY,
    header_id INTEGER NOT NULL,
    state_path BLOB NOT NULL,
    storage_leaf_key TEXT NOT NULL,
    cid TEXT NOT NULL,
    storage_path BLOB NOT NULL,
    node_type INTEGER NOT NULL,
    diff INTEGER NOT NULL DEFAULT 0,
    mh_key TEXT NOT NULL,
    UNIQUE (header_id, state_path, storage_path)
);
CREATE TABLE IF NOT EXISTS blocks (
    key TEXT PRIMARY KEY,
    data BLOB NOT NULL
);
";

/// Relational catalog plus content-addressed blob table in sqlite. Every
/// worker transaction runs on its own connection; the WAL journal and a
/// busy timeout keep concurrent writers out of each other's way.
pub struct SqlitePublisher {
    path: PathBuf,
    counters: Arc<Counters>,
    ticker: Once,
}

impl SqlitePublisher {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, PublishError> {
        let publisher = Self {
            path: path.into(),
            counters: Arc::new(Counters::default()),
            ticker: Once::new(),
        };
        publisher.connect()?.execute_batch(SCHEMA)?;
        Ok(publisher)
    }

    fn connect(&self) -> Result<Connection, PublishError> {
        let conn = Connection::open(&self.path)?;
        let _mode: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Ok(conn)
    }
}

impl Publisher for SqlitePublisher {
    fn publish_header(&self, record: &HeaderRecord<'_>) -> Result<i64, PublishError> {
        let header = record.header;
        let mh = ipld::keccak_multihash(header.hash);
        let mh_key = ipld::multihash_key(&mh);
        let cid = ipld::cid_string(ipld::MULTICODEC_ETH_HEADER, &mh);

        let conn = self.connect()?;
        let tx = conn.unchecked_transaction()?;
        upsert_blob(&tx, &mh_key, record.raw)?;
        let header_id = tx.query_row(
            "INSERT INTO header_cids (block_number, block_hash, parent_hash, cid, td, node_id, \
                 reward, state_root, tx_root, receipt_root, uncle_root, bloom, timestamp, mh_key, \
                 times_validated) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15) \
             ON CONFLICT (block_number, block_hash) DO UPDATE SET block_number = excluded.block_number \
             RETURNING id",
            params![
                header.number as i64,
                format!("{:#x}", header.hash),
                format!("{:#x}", header.parent_hash),
                cid,
                "0",
                record.node_id,
                "0",
                format!("{:#x}", header.state_root),
                format!("{:#x}", header.tx_root),
                format!("{:#x}", header.receipt_root),
                format!("{:#x}", header.uncle_hash),
                header.bloom,
                header.timestamp as i64,
                mh_key,
                0i64,
            ],
            |row| row.get(0),
        )?;
        tx.commit()?;
        Ok(header_id)
    }

    fn begin_tx(&self) -> Result<Box<dyn BatchTx>, PublishError> {
        start_log_ticker(&self.ticker, &self.counters);
        let conn = self.connect()?;
        conn.execute_batch("BEGIN")?;
        Ok(Box::new(SqliteBatchTx {
            conn,
            counters: Arc::clone(&self.counters),
            batch_size: 0,
        }))
    }

    fn counters(&self) -> &Counters {
        &self.counters
    }
}

struct SqliteBatchTx {
    conn: Connection,
    counters: Arc<Counters>,
    batch_size: u32,
}

impl BatchTx for SqliteBatchTx {
    fn publish_state_node(
        &mut self,
        header_id: i64,
        node: &TrieNodeRecord<'_>,
    ) -> Result<i64, PublishError> {
        let mh = ipld::keccak_multihash(keccak(node.value));
        let mh_key = ipld::multihash_key(&mh);
        let cid = ipld::cid_string(ipld::MULTICODEC_ETH_STATE_TRIE, &mh);
        upsert_blob(&self.conn, &mh_key, node.value)?;

        let state_id = self.conn.query_row(
            "INSERT INTO state_cids (header_id, state_leaf_key, cid, state_path, node_type, diff, mh_key) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7) \
             ON CONFLICT (header_id, state_path) DO UPDATE SET \
                 state_leaf_key = excluded.state_leaf_key, cid = excluded.cid, \
                 node_type = excluded.node_type, diff = excluded.diff, mh_key = excluded.mh_key \
             RETURNING id",
            params![
                header_id,
                leaf_key_text(node.leaf_key),
                cid,
                node.path.as_slice(),
                node.kind as i64,
                false,
                mh_key,
            ],
            |row| row.get(0),
        )?;
        self.counters.count_state_node();
        self.batch_size += 2;
        Ok(state_id)
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
        upsert_blob(&self.conn, &mh_key, node.value)?;

        self.conn.execute(
            "INSERT INTO storage_cids (header_id, state_path, storage_leaf_key, cid, storage_path, node_type, diff, mh_key) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8) \
             ON CONFLICT (header_id, state_path, storage_path) DO UPDATE SET \
                 storage_leaf_key = excluded.storage_leaf_key, cid = excluded.cid, \
                 node_type = excluded.node_type, diff = excluded.diff, mh_key = excluded.mh_key",
            params![
                header_id,
                state_path.as_slice(),
                leaf_key_text(node.leaf_key),
                cid,
                node.path.as_slice(),
                node.kind as i64,
                false,
                mh_key,
            ],
        )?;
        self.counters.count_storage_node();
        self.batch_size += 2;
        Ok(())
    }

    fn publish_code(&mut self, code_hash: H256, code: &[u8]) -> Result<(), PublishError> {
        // No codec for code: the blob key is multihash-derived, which is all
        // downstream consumers need.
        let mh = ipld::keccak_multihash(code_hash);
        upsert_blob(&self.conn, &ipld::multihash_key(&mh), code)?;
        self.counters.count_code_blob();
        self.batch_size += 1;
        Ok(())
    }

    fn prepare_batch(&mut self, max_batch: u32) -> Result<(), PublishError> {
        if self.batch_size >= max_batch {
            self.conn.execute_batch("COMMIT")?;
            self.conn.execute_batch("BEGIN")?;
            self.batch_size = 0;
        }
        Ok(())
    }

    fn commit(self: Box<Self>) -> Result<(), PublishError> {
        self.conn.execute_batch("COMMIT")?;
        Ok(())
    }

    fn rollback(self: Box<Self>) -> Result<(), PublishError> {
        self.conn.execute_batch("ROLLBACK")?;
        Ok(())
    }
}

fn upsert_blob(conn: &Connection, mh_key: &str, data: &[u8]) -> Result<(), PublishError> {
    conn.execute(
        "INSERT INTO blocks (key, data) VALUES (?1, ?2) \
         ON CONFLICT (key) DO UPDATE SET data = excluded.data",
        params![mh_key, data],
    )?;
    Ok(())
}

fn leaf_key_text(leaf_key: Option<H256>) -> String {
    leaf_key.map(|key| format!("{key:#x}")).unwrap_or_default()
}

#[cfg(test)]
mod test {
    use super::*;
    use statesnap_trie::NodeKind;

    fn node_record<'a>(path: &'a Nibbles, value: &'a [u8]) -> TrieNodeRecord<'a> {
        TrieNodeRecord {
            path,
            kind: NodeKind::Leaf,
            leaf_key: Some(keccak(b"leaf key")),
            value,
        }
    }

    #[test]
    fn state_upserts_are_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let publisher = SqlitePublisher::open(dir.path().join("catalog.db")).unwrap();
        let path = Nibbles::from_hex(vec![0xa, 0xb]);

        let mut tx = publisher.begin_tx().unwrap();
        let first = tx.publish_state_node(1, &node_record(&path, b"node-bytes")).unwrap();
        let second = tx.publish_state_node(1, &node_record(&path, b"node-bytes")).unwrap();
        assert_eq!(first, second);
        tx.commit().unwrap();

        let conn = publisher.connect().unwrap();
        let rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM state_cids", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, 1);
        assert_eq!(publisher.counters().state_nodes(), 2);
    }

    #[test]
    fn batch_rotation_keeps_the_transaction_usable() {
        let dir = tempfile::tempdir().unwrap();
        let publisher = SqlitePublisher::open(dir.path().join("catalog.db")).unwrap();
        let mut tx = publisher.begin_tx().unwrap();
        for i in 0..10u8 {
            let path = Nibbles::from_hex(vec![i]);
            tx.publish_state_node(1, &node_record(&path, &[i])).unwrap();
            tx.prepare_batch(1).unwrap();
        }
        tx.commit().unwrap();

        let conn = publisher.connect().unwrap();
        let rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM state_cids", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, 10);
    }

    #[test]
    fn rollback_discards_the_open_batch() {
        let dir = tempfile::tempdir().unwrap();
        let publisher = SqlitePublisher::open(dir.path().join("catalog.db")).unwrap();
        let mut tx = publisher.begin_tx().unwrap();
        let path = Nibbles::from_hex(vec![1]);
        tx.publish_state_node(1, &node_record(&path, b"bytes")).unwrap();
        tx.rollback().unwrap();

        let conn = publisher.connect().unwrap();
        let rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM state_cids", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, 0);
    }
}
