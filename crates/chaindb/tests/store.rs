//! End-to-end scenarios for the block store, exercising both node
//! profiles against real on-disk environments.

use chaindb::types::{
    BlkDataKey, DbValue, HgtX, Profile, PruneType, StoredHeadHgtList, StoredHeader,
    StoredScriptHistory, StoredSubHistory, StoredTx, StoredTxHints, TxioPair, ZcKey,
};
use chaindb::{BlockRef, BlockStore, DbSelect, OpenParams, StoreError};
use bitcoin::absolute::LockTime;
use bitcoin::block::{Header, Version as BlockVersion};
use bitcoin::consensus::encode::serialize;
use bitcoin::hashes::Hash;
use bitcoin::transaction::Version as TxVersion;
use bitcoin::{
    Amount, Block, BlockHash, CompactTarget, OutPoint, ScriptBuf, Sequence, Transaction, TxIn,
    TxMerkleNode, TxOut, Txid, Witness,
};
use std::path::Path;
use tempfile::tempdir;

const MAGIC: [u8; 4] = [0xf9, 0xbe, 0xb4, 0xd9];
const GENESIS: [u8; 32] = [0x6f; 32];

fn params(dir: &Path, profile: Profile) -> OpenParams {
    OpenParams {
        base_dir: dir.to_path_buf(),
        genesis_blk_hash: BlockHash::from_byte_array(GENESIS),
        genesis_tx_hash: Txid::from_byte_array([0x4a; 32]),
        magic: MAGIC,
        profile,
        prune: PruneType::None,
        map_size: Some(64 * 1024 * 1024),
    }
}

fn open(dir: &Path, profile: Profile) -> BlockStore {
    BlockStore::open(params(dir, profile), || true).unwrap()
}

fn header(nonce: u32) -> Header {
    Header {
        version: BlockVersion::from_consensus(2),
        prev_blockhash: BlockHash::from_byte_array([0u8; 32]),
        merkle_root: TxMerkleNode::from_byte_array([(nonce % 251) as u8; 32]),
        time: 1_296_688_602,
        bits: CompactTarget::from_consensus(0x1d00_ffff),
        nonce,
    }
}

fn tx(seed: u8, num_outputs: usize) -> Transaction {
    Transaction {
        version: TxVersion::ONE,
        lock_time: LockTime::ZERO,
        input: vec![TxIn {
            previous_output: OutPoint { txid: Txid::from_byte_array([seed; 32]), vout: 0 },
            script_sig: ScriptBuf::new(),
            sequence: Sequence::MAX,
            witness: Witness::new(),
        }],
        output: (0..num_outputs)
            .map(|i| TxOut {
                value: Amount::from_sat(1_000 * (i as u64 + 1)),
                script_pubkey: ScriptBuf::from_bytes(vec![0x6a, seed, i as u8]),
            })
            .collect(),
    }
}

fn bare_key6(height: u32, dup: u8, idx: u16) -> [u8; 6] {
    BlkDataKey::tx(height, dup, idx).encode_bare().try_into().unwrap()
}

// ----------------------------------------------------------------------
// Open semantics
// ----------------------------------------------------------------------

#[test]
fn open_fresh_fullnode_seeds_metadata() {
    let dir = tempdir().unwrap();
    let store = open(dir.path(), Profile::Full);

    for sub in ["headers", "blocks", "history", "txhints"] {
        assert!(dir.path().join(sub).exists(), "{sub} environment should exist");
    }

    for db in [DbSelect::Headers, DbSelect::History] {
        let sdbi = store.get_db_info(db).unwrap().expect("metadata seeded");
        assert_eq!(sdbi.magic, MAGIC);
        assert_eq!(sdbi.top_blk_hgt, 0);
        assert_eq!(sdbi.top_blk_hash, BlockHash::from_byte_array(GENESIS));
        assert_eq!(sdbi.profile, Profile::Full);
    }

    // BLKDATA carries no metadata under FULL; reads are a schema misuse.
    assert!(matches!(
        store.get_db_info(DbSelect::Blkdata),
        Err(StoreError::NoDbInfo(DbSelect::Blkdata))
    ));

    // A fresh headers DB holds exactly its metadata row.
    let entries = store.get_all_database_entries(DbSelect::Headers).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].0, vec![0u8]);
}

#[test]
fn open_with_wrong_profile_fails() {
    let dir = tempdir().unwrap();

    // Build a fullnode store, then try to open it as supernode.
    drop(open(dir.path(), Profile::Full));
    let err = BlockStore::open(params(dir.path(), Profile::Super), || true).unwrap_err();
    assert!(matches!(err, StoreError::ProfileMismatch));
    assert_eq!(err.to_string(), "Mismatch in DB type");

    // And the reverse: supernode store opened as fullnode.
    let dir2 = tempdir().unwrap();
    drop(open(dir2.path(), Profile::Super));
    let err = BlockStore::open(params(dir2.path(), Profile::Full), || true).unwrap_err();
    assert!(matches!(err, StoreError::ProfileMismatch));
}

#[test]
fn open_with_wrong_magic_fails() {
    let dir = tempdir().unwrap();
    drop(open(dir.path(), Profile::Full));

    let mut p = params(dir.path(), Profile::Full);
    p.magic = [1, 2, 3, 4];
    let err = BlockStore::open(p, || true).unwrap_err();
    assert!(matches!(err, StoreError::MagicMismatch));
}

#[test]
fn readiness_predicate_is_exposed() {
    let dir = tempdir().unwrap();
    let store = BlockStore::open(params(dir.path(), Profile::Full), || false).unwrap();
    assert!(!store.is_ready());
    assert!(store.is_open());
}

// ----------------------------------------------------------------------
// Header duplicates and reorg marking
// ----------------------------------------------------------------------

#[test]
fn duplicate_headers_at_one_height() {
    let dir = tempdir().unwrap();
    let store = open(dir.path(), Profile::Full);

    let mut a = StoredHeader::new(header(1), 100);
    a.main_branch = true;
    let dup_a = store.put_bare_header(&mut a, true).unwrap();
    assert_eq!(dup_a, 0);

    let mut b = StoredHeader::new(header(2), 100);
    b.main_branch = false;
    let dup_b = store.put_bare_header(&mut b, true).unwrap();
    assert_eq!(dup_b, 1);

    let hhl = store.get_stored_head_hgt_list(100).unwrap().unwrap();
    assert_eq!(hhl.dup_and_hash_list, vec![(0, a.hash()), (1, b.hash())]);
    assert_eq!(hhl.preferred_dup, Some(0));
    assert_eq!(store.get_valid_dup_id_for_height(100), Some(0));

    // Re-putting a known hash reuses its dup.
    let mut a_again = StoredHeader::new(header(1), 100);
    a_again.main_branch = true;
    assert_eq!(store.put_bare_header(&mut a_again, true).unwrap(), 0);
    assert_eq!(store.get_stored_head_hgt_list(100).unwrap().unwrap().dup_and_hash_list.len(), 2);
}

#[test]
fn mark_valid_flips_preferred_dup() {
    let dir = tempdir().unwrap();
    let store = open(dir.path(), Profile::Full);

    let mut a = StoredHeader::new(header(1), 100);
    a.main_branch = true;
    store.put_bare_header(&mut a, true).unwrap();
    let mut b = StoredHeader::new(header(2), 100);
    b.main_branch = false;
    store.put_bare_header(&mut b, true).unwrap();

    assert!(store.mark_block_header_valid(100, 1).unwrap());

    let hhl = store.get_stored_head_hgt_list(100).unwrap().unwrap();
    assert_eq!(hhl.preferred_dup, Some(1));
    // Membership unchanged.
    assert_eq!(hhl.dup_and_hash_list, vec![(0, a.hash()), (1, b.hash())]);
    assert_eq!(store.get_valid_dup_id_for_height(100), Some(1));

    // Marking a dup that is not in the list fails.
    assert!(!store.mark_block_header_valid(100, 7).unwrap());

    // Mark-valid by hash round-trips through the stored row.
    assert!(store.mark_block_header_valid_by_hash(&a.hash()).unwrap());
    assert_eq!(store.get_valid_dup_id_for_height(100), Some(0));
}

#[test]
fn top_of_chain_is_monotonic() {
    let dir = tempdir().unwrap();
    let store = open(dir.path(), Profile::Full);

    let mut expected_top = 0;
    for (nonce, height) in [(1u32, 5u32), (2, 9), (3, 7), (4, 9), (5, 12)] {
        let mut sbh = StoredHeader::new(header(nonce), height);
        sbh.main_branch = true;
        store.put_bare_header(&mut sbh, true).unwrap();
        expected_top = expected_top.max(height);
        assert_eq!(store.get_top_block_height(DbSelect::Headers).unwrap(), Some(expected_top));
    }
}

#[test]
fn dup_table_rebuilds_from_disk_on_reopen() {
    let dir = tempdir().unwrap();
    {
        let store = open(dir.path(), Profile::Full);
        for height in [10u32, 11, 12] {
            let mut sbh = StoredHeader::new(header(height), height);
            sbh.main_branch = true;
            store.put_bare_header(&mut sbh, true).unwrap();
        }
        store.mark_block_header_valid(11, 0).unwrap();
    }

    let store = open(dir.path(), Profile::Full);
    assert_eq!(store.get_valid_dup_id_for_height(10), Some(0));
    assert_eq!(store.get_valid_dup_id_for_height(11), Some(0));
    assert_eq!(store.get_valid_dup_id_for_height(12), Some(0));
    assert_eq!(store.get_valid_dup_id_for_height(13), None);
    assert_eq!(store.get_valid_dup_id_from_db(12).unwrap(), Some(0));
}

#[test]
fn read_all_headers_visits_every_header() {
    let dir = tempdir().unwrap();
    let store = open(dir.path(), Profile::Full);

    for height in [3u32, 1, 2] {
        let mut sbh = StoredHeader::new(header(height), height);
        sbh.main_branch = true;
        store.put_bare_header(&mut sbh, true).unwrap();
    }

    let mut seen = Vec::new();
    store.read_all_headers(|hdr, height, dup| seen.push((hdr.block_hash(), height, dup))).unwrap();
    assert_eq!(seen.len(), 3);
    let mut heights: Vec<u32> = seen.iter().map(|&(_, h, _)| h).collect();
    heights.sort_unstable();
    assert_eq!(heights, vec![1, 2, 3]);
    assert!(seen.iter().all(|&(_, _, dup)| dup == 0));
}

#[test]
fn nuke_headers_db_reseeds_metadata() {
    let dir = tempdir().unwrap();
    let store = open(dir.path(), Profile::Full);

    let mut sbh = StoredHeader::new(header(1), 42);
    sbh.main_branch = true;
    store.put_bare_header(&mut sbh, true).unwrap();
    assert!(store.get_stored_head_hgt_list(42).unwrap().is_some());

    store.nuke_headers_db().unwrap();

    assert!(store.get_stored_head_hgt_list(42).unwrap().is_none());
    assert!(store.get_bare_header_by_hash(&sbh.hash()).unwrap().is_none());
    assert_eq!(store.get_valid_dup_id_for_height(42), None);

    let sdbi = store.get_db_info(DbSelect::Headers).unwrap().unwrap();
    assert_eq!(sdbi.top_blk_hgt, 0);
    assert_eq!(sdbi.top_blk_hash, BlockHash::from_byte_array(GENESIS));
}

#[test]
fn destroy_and_reset_wipes_everything() {
    let dir = tempdir().unwrap();
    let mut store = open(dir.path(), Profile::Full);

    let mut sbh = StoredHeader::new(header(9), 9);
    sbh.main_branch = true;
    store.put_bare_header(&mut sbh, true).unwrap();

    store.destroy_and_reset().unwrap();

    assert!(store.is_open());
    assert!(store.get_bare_header_by_hash(&sbh.hash()).unwrap().is_none());
    assert_eq!(store.get_top_block_height(DbSelect::Headers).unwrap(), Some(0));
}

#[test]
fn close_is_redundant_and_final() {
    let dir = tempdir().unwrap();
    let mut store = open(dir.path(), Profile::Full);
    store.close();
    store.close();
    assert!(!store.is_open());
    assert!(matches!(store.get_stored_head_hgt_list(1), Err(StoreError::Closed)));
}

// ----------------------------------------------------------------------
// Tx hints
// ----------------------------------------------------------------------

#[test]
fn colliding_hints_resolve_by_full_hash() {
    let dir = tempdir().unwrap();
    let store = open(dir.path(), Profile::Super);

    let mut sbh = StoredHeader::new(header(1), 100);
    sbh.main_branch = true;
    store.put_bare_header(&mut sbh, true).unwrap();

    let tx_a = tx(0xaa, 2);
    let tx_b = tx(0xbb, 1);
    let mut stx_a = StoredTx::from_tx(&tx_a, 100, 0, 0);
    let mut stx_b = StoredTx::from_tx(&tx_b, 100, 0, 1);
    store.put_stored_tx(&mut stx_a, true).unwrap();
    store.put_stored_tx(&mut stx_b, true).unwrap();

    // Force the two candidates into one hint list, as if the hashes
    // shared their 4-byte prefix; insertion order, latest preferred.
    let mut hints = StoredTxHints::empty(stx_a.hash_prefix());
    hints.prefer(bare_key6(100, 0, 0));
    hints.prefer(bare_key6(100, 0, 1));
    assert!(store.put_stored_tx_hints(&hints).unwrap());

    let read_back = store.get_hints_for_tx_hash(&stx_a.hash).unwrap();
    assert_eq!(read_back.num_hints(), 2);
    let preferred = read_back.preferred_db_key.unwrap();
    assert!(read_back.contains(&preferred));
    assert_eq!(preferred, bare_key6(100, 0, 1));

    // Lookup of A must skip the preferred candidate (hash mismatch) and
    // land on the right tx by comparing full hashes.
    let found = store.get_stored_tx_by_hash(&stx_a.hash).unwrap().unwrap();
    assert_eq!(found.hash, stx_a.hash);
    assert_eq!(found.tx_index, 0);
    assert_eq!(found.stxo_map.len(), 2);

    let found_b = store.get_stored_tx_by_hash(&stx_b.hash).unwrap().unwrap();
    assert_eq!(found_b.tx_index, 1);
}

#[test]
fn put_tx_maintains_hint_integrity() {
    let dir = tempdir().unwrap();
    let store = open(dir.path(), Profile::Super);

    let mut sbh = StoredHeader::new(header(1), 50);
    sbh.main_branch = true;
    store.put_bare_header(&mut sbh, true).unwrap();

    let mut stx = StoredTx::from_tx(&tx(0x01, 1), 50, 0, 0);
    store.put_stored_tx(&mut stx, true).unwrap();

    let hints = store.get_hints_for_tx_hash(&stx.hash).unwrap();
    let preferred = hints.preferred_db_key.expect("preferred set after put");
    assert!(hints.db_key_list.contains(&preferred));

    // The preferred key resolves to a record whose stored hash matches.
    let stored_hash = store.get_tx_hash_for_db_key(preferred).unwrap().unwrap();
    assert_eq!(stored_hash, stx.hash);

    // Resolving the hash back to a key agrees.
    assert_eq!(store.get_db_key_for_tx_hash(&stx.hash).unwrap(), Some(preferred));
}

#[test]
fn update_preferred_hint_requires_membership() {
    let dir = tempdir().unwrap();
    let store = open(dir.path(), Profile::Super);

    let mut sbh = StoredHeader::new(header(1), 10);
    sbh.main_branch = true;
    store.put_bare_header(&mut sbh, true).unwrap();

    let mut stx = StoredTx::from_tx(&tx(0x07, 1), 10, 0, 0);
    store.put_stored_tx(&mut stx, false).unwrap();

    let hash_bytes = *stx.hash.as_byte_array();
    let foreign = bare_key6(11, 0, 0);
    assert!(!store.update_preferred_tx_hint(&hash_bytes, foreign).unwrap());

    let member = bare_key6(10, 0, 0);
    assert!(store.update_preferred_tx_hint(&hash_bytes, member).unwrap());
}

#[test]
fn mark_tx_entry_valid_rewrites_hint_order() {
    let dir = tempdir().unwrap();
    let store = open(dir.path(), Profile::Super);

    let mut sbh = StoredHeader::new(header(1), 20);
    sbh.main_branch = true;
    store.put_bare_header(&mut sbh, true).unwrap();

    // Same tx stored on two branches at the same height.
    let the_tx = tx(0x33, 1);
    let mut stx0 = StoredTx::from_tx(&the_tx, 20, 0, 0);
    let mut stx1 = StoredTx::from_tx(&the_tx, 20, 1, 0);
    store.put_stored_tx(&mut stx0, false).unwrap();
    store.put_stored_tx(&mut stx1, false).unwrap();

    // The second put made dup 1 preferred; flip back to the dup-0 copy.
    assert!(store.mark_tx_entry_valid(20, 0, 0).unwrap());
    let hints = store.get_hints_for_tx_hash(&stx0.hash).unwrap();
    assert_eq!(hints.preferred_db_key, Some(bare_key6(20, 0, 0)));
    assert_eq!(hints.num_hints(), 2);
}

// ----------------------------------------------------------------------
// SUPER block bodies
// ----------------------------------------------------------------------

#[test]
fn super_stored_header_with_body_roundtrip() {
    let dir = tempdir().unwrap();
    let store = open(dir.path(), Profile::Super);

    let txs = vec![tx(0x51, 2), tx(0x52, 1), tx(0x53, 3)];
    let mut sbh = StoredHeader::new(header(7), 77);
    sbh.main_branch = true;
    sbh.num_tx = txs.len() as u32;
    sbh.num_bytes = 80 + txs.iter().map(|t| serialize(t).len() as u32).sum::<u32>();
    for (i, t) in txs.iter().enumerate() {
        sbh.tx_map.insert(i as u16, StoredTx::from_tx(t, 77, 0, i as u16));
    }

    let dup = store.put_stored_header(&mut sbh, true, true).unwrap();
    assert_eq!(dup, 0);

    // Header-only read.
    let bare = store.get_stored_header(77, 0, false).unwrap().unwrap();
    assert!(bare.main_branch);
    assert_eq!(bare.num_tx, 3);
    assert_eq!(bare.hash(), sbh.hash());
    assert!(bare.tx_map.is_empty());

    // Full body reconstruction walks the decomposed rows.
    let full = store.get_stored_header(77, 0, true).unwrap().unwrap();
    assert_eq!(full.tx_map.len(), 3);
    for (i, t) in txs.iter().enumerate() {
        let stx = &full.tx_map[&(i as u16)];
        assert_eq!(stx.hash, t.compute_txid());
        assert_eq!(stx.stxo_map.len(), t.output.len());
        assert_eq!(stx.tx().unwrap(), *t);
    }

    // By-hash read resolves through the headers DB.
    let by_hash = store.get_stored_header_by_hash(&sbh.hash(), true).unwrap().unwrap();
    assert_eq!(by_hash.tx_map.len(), 3);

    // Individual lookups.
    let one = store.get_stored_tx(77, 1, true).unwrap().unwrap();
    assert_eq!(one.hash, txs[1].compute_txid());
    assert_eq!(
        store.get_full_tx_copy_at(77, 2).unwrap().unwrap().compute_txid(),
        txs[2].compute_txid()
    );
    assert_eq!(
        store.get_tx_hash_for_height_and_index(77, 0).unwrap(),
        Some(txs[0].compute_txid())
    );
    assert_eq!(store.get_stxo_count_for_tx(bare_key6(77, 0, 2)).unwrap(), Some(3));

    let stxo = store.get_stored_tx_out_main(77, 0, 1).unwrap().unwrap();
    assert_eq!(stxo.tx_out_index, 1);
    assert_eq!(stxo.height, 77);
    assert_eq!(stxo.value_sat().unwrap(), 2_000);

    // The BLKDATA metadata top advanced with the body write.
    let sdbi = store.get_db_info(DbSelect::Blkdata).unwrap().unwrap();
    assert_eq!(sdbi.top_blk_hgt, 77);
    assert_eq!(sdbi.top_blk_hash, sbh.hash());
}

#[test]
fn super_rejects_fullnode_apis() {
    let dir = tempdir().unwrap();
    let store = open(dir.path(), Profile::Super);
    let err = store.put_raw_block_data(&[0u8; 100], |_| None).unwrap_err();
    assert!(matches!(err, StoreError::SchemaMisuse { required: Profile::Full }));
}

#[test]
fn full_rejects_supernode_apis() {
    let dir = tempdir().unwrap();
    let store = open(dir.path(), Profile::Full);

    let mut sbh = StoredHeader::new(header(1), 1);
    let err = store.put_stored_header(&mut sbh, true, true).unwrap_err();
    assert!(matches!(err, StoreError::SchemaMisuse { required: Profile::Super }));

    let mut stx = StoredTx::from_tx(&tx(0x01, 1), 1, 0, 0);
    let err = store.put_stored_tx(&mut stx, true).unwrap_err();
    assert!(matches!(err, StoreError::SchemaMisuse { required: Profile::Super }));
}

// ----------------------------------------------------------------------
// FULL raw blocks
// ----------------------------------------------------------------------

#[test]
fn full_raw_block_roundtrip() {
    let dir = tempdir().unwrap();
    let store = open(dir.path(), Profile::Full);

    let txs = vec![tx(0x61, 1), tx(0x62, 2)];
    let block = Block { header: header(3), txdata: txs.clone() };
    let raw = serialize(&block);

    let mut sbh = StoredHeader::new(block.header, 300);
    sbh.main_branch = true;
    store.put_bare_header(&mut sbh, true).unwrap();

    let num_bytes = raw.len() as u32;
    let dup = store
        .put_raw_block_data(&raw, |hash| {
            assert_eq!(*hash, block.header.block_hash());
            Some(BlockRef { height: 300, dup: 0, main_branch: true, num_bytes })
        })
        .unwrap();
    assert_eq!(dup, Some(0));

    // The HISTORY metadata tracks the top under FULL.
    let sdbi = store.get_db_info(DbSelect::History).unwrap().unwrap();
    assert_eq!(sdbi.top_blk_hgt, 300);
    assert_eq!(sdbi.top_blk_hash, block.header.block_hash());

    // Tx-level reads walk the blob.
    let got = store.get_full_tx_copy(bare_key6(300, 0, 1)).unwrap().unwrap();
    assert_eq!(got.compute_txid(), txs[1].compute_txid());
    assert_eq!(
        store.get_tx_hash_for_db_key(bare_key6(300, 0, 0)).unwrap(),
        Some(txs[0].compute_txid())
    );
    assert_eq!(store.get_stxo_count_for_tx(bare_key6(300, 0, 1)).unwrap(), Some(2));

    let full = store.get_stored_header(300, 0, true).unwrap().unwrap();
    assert_eq!(full.num_tx, 2);
    assert_eq!(full.num_bytes, num_bytes);
    assert_eq!(full.tx_map.len(), 2);

    // A tx-out that is not tracked in HISTORY is recovered from the blob.
    let stxo = store.get_stored_tx_out_at(300, 0, 1, 0).unwrap().unwrap();
    assert_eq!(stxo.value_sat().unwrap(), 1_000);
    assert_eq!(stxo.height, 300);

    // An unknown header is a miss, not a write.
    let missed = store.put_raw_block_data(&raw, |_| None).unwrap();
    assert!(missed.is_none());
}

#[test]
fn full_hash_lookup_uses_hints() {
    let dir = tempdir().unwrap();
    let store = open(dir.path(), Profile::Full);

    let txs = vec![tx(0x71, 1), tx(0x72, 1)];
    let block = Block { header: header(4), txdata: txs.clone() };
    let raw = serialize(&block);

    let mut sbh = StoredHeader::new(block.header, 400);
    sbh.main_branch = true;
    store.put_bare_header(&mut sbh, true).unwrap();
    store
        .put_raw_block_data(&raw, |_| {
            Some(BlockRef { height: 400, dup: 0, main_branch: true, num_bytes: raw.len() as u32 })
        })
        .unwrap();

    // FULL tracks hints only for registered txs; register tx 1 by hand.
    let target = txs[1].compute_txid();
    let mut prefix = [0u8; 4];
    prefix.copy_from_slice(&target.as_byte_array()[..4]);
    let mut hints = StoredTxHints::empty(prefix);
    hints.prefer(bare_key6(400, 0, 1));
    store.put_stored_tx_hints(&hints).unwrap();

    let found = store.get_stored_tx_by_hash(&target).unwrap().unwrap();
    assert_eq!(found.height, 400);
    assert_eq!(found.tx_index, 1);
    assert_eq!(found.hash, target);

    // A hash with no hint entry is a miss.
    assert!(store.get_stored_tx_by_hash(&txs[0].compute_txid()).unwrap().is_none());
}

// ----------------------------------------------------------------------
// Script history range scan
// ----------------------------------------------------------------------

fn txio(height: u32, tx_idx: u16, value: u64) -> TxioPair {
    TxioPair {
        value_sat: value,
        tx_out_key: BlkDataKey::tx_out(height, 0, tx_idx, 0).encode_bare().try_into().unwrap(),
        tx_in_key: None,
        from_coinbase: false,
    }
}

fn seeded_ssh(store: &BlockStore, addr: &[u8], heights: &[u32]) -> StoredScriptHistory {
    let mut ssh = StoredScriptHistory::new(addr.to_vec());
    ssh.scanned_up_to = *heights.iter().max().unwrap();
    for &h in heights {
        let mut sub = StoredSubHistory::new(addr.to_vec(), HgtX::new(h, 0));
        sub.push_txio(txio(h, 0, 5_000));
        ssh.total_txio_count += 1;
        ssh.total_unspent += 5_000;
        ssh.merge_sub_history(sub);
    }
    store.put_stored_script_history(&ssh).unwrap();
    ssh
}

#[test]
fn range_scan_selects_window() {
    let dir = tempdir().unwrap();
    let store = open(dir.path(), Profile::Full);
    let addr = b"\x00twenty_byte_addr_xx".to_vec();
    seeded_ssh(&store, &addr, &[50, 100, 200]);

    let windowed = store.get_stored_script_history(&addr, 60, 150).unwrap().unwrap();
    assert_eq!(windowed.sub_hist_map.len(), 1);
    assert!(windowed.sub_hist_map.contains_key(&HgtX::new(100, 0)));

    let all = store.get_stored_script_history(&addr, 0, u32::MAX).unwrap().unwrap();
    let heights: Vec<u32> =
        all.sub_hist_map.keys().map(|hgtx| hgtx.height()).collect();
    assert_eq!(heights, vec![50, 100, 200]);

    // Window entirely before the first sub-history.
    let none = store.get_stored_script_history(&addr, 1, 10).unwrap().unwrap();
    assert!(none.sub_hist_map.is_empty());

    // Unknown address is a miss.
    assert!(store.get_stored_script_history(b"\x00nobody", 0, 100).unwrap().is_none());
}

#[test]
fn ssh_summary_and_balance() {
    let dir = tempdir().unwrap();
    let store = open(dir.path(), Profile::Full);
    let addr = b"\x00another_addr_000000".to_vec();
    let ssh = seeded_ssh(&store, &addr, &[10, 20, 30]);

    let summary = store.get_stored_script_history_summary(&addr).unwrap().unwrap();
    assert_eq!(summary.total_txio_count, 3);
    assert_eq!(summary.total_unspent, 15_000);
    assert_eq!(summary.scanned_up_to, ssh.scanned_up_to);
    assert!(summary.sub_hist_map.is_empty());

    assert_eq!(store.get_balance_for_scr_addr(&addr).unwrap(), 15_000);
    assert_eq!(store.get_balance_for_scr_addr(b"\x00missing").unwrap(), 0);

    let counts = store.get_ssh_summary(&addr, 25).unwrap();
    assert_eq!(counts.len(), 2);
    assert_eq!(counts[&10], 1);
    assert_eq!(counts[&20], 1);
}

#[test]
fn fetch_sub_history_merges_and_creates() {
    let dir = tempdir().unwrap();
    let store = open(dir.path(), Profile::Full);
    let addr = b"\x00fetch_test_addr_000".to_vec();
    seeded_ssh(&store, &addr, &[100]);

    let mut ssh = store.get_stored_script_history_summary(&addr).unwrap().unwrap();
    assert!(ssh.sub_hist_map.is_empty());

    // Pull an existing sub-history from disk.
    assert!(store.fetch_stored_sub_history(&mut ssh, HgtX::new(100, 0), false, false).unwrap());
    assert_eq!(ssh.sub_hist_map[&HgtX::new(100, 0)].txio_map.len(), 1);

    // Absent without create: miss.
    assert!(!store.fetch_stored_sub_history(&mut ssh, HgtX::new(200, 0), false, false).unwrap());
    // Absent with create: empty entry appears.
    assert!(store.fetch_stored_sub_history(&mut ssh, HgtX::new(200, 0), true, false).unwrap());
    assert!(ssh.sub_hist_map[&HgtX::new(200, 0)].txio_map.is_empty());

    let direct = store
        .get_stored_sub_history_at_hgtx(&addr, HgtX::new(100, 0))
        .unwrap()
        .unwrap();
    assert_eq!(direct.txio_map.len(), 1);
}

#[test]
fn super_history_lives_in_blkdata() {
    let dir = tempdir().unwrap();
    let store = open(dir.path(), Profile::Super);
    let addr = b"\x00super_hist_addr_000".to_vec();
    seeded_ssh(&store, &addr, &[5]);

    let got = store.get_stored_script_history(&addr, 0, 10).unwrap().unwrap();
    assert_eq!(got.sub_hist_map.len(), 1);

    // The rows share the single blkdata table with everything else.
    let entries = store.get_all_database_entries(DbSelect::Blkdata).unwrap();
    assert!(entries.iter().any(|(k, _)| k.first() == Some(&0x05)));
}

// ----------------------------------------------------------------------
// Zero-conf records
// ----------------------------------------------------------------------

#[test]
fn zc_tx_roundtrip() {
    let dir = tempdir().unwrap();
    let store = open(dir.path(), Profile::Super);

    let the_tx = tx(0x99, 2);
    let mut stx = StoredTx::from_tx(&the_tx, 0, 0, 0);
    let zc_key = ZcKey::new(7);
    store.put_stored_zc(&mut stx, &zc_key, 1_700_000_000).unwrap();

    let (got, time) = store.get_stored_zc_tx(&zc_key).unwrap().unwrap();
    assert_eq!(got.hash, the_tx.compute_txid());
    assert_eq!(time, 1_700_000_000);
    assert_eq!(got.stxo_map.len(), 2);
    assert_eq!(got.stxo_map[&1].value_sat().unwrap(), 2_000);

    // ZC keys are visible to the hash-for-key path.
    let mut key6 = [0u8; 6];
    key6.copy_from_slice(zc_key.as_bytes());
    assert_eq!(store.get_tx_hash_for_db_key(key6).unwrap(), Some(stx.hash));
    assert_eq!(store.get_stxo_count_for_tx(key6).unwrap(), Some(2));

    // Unknown ZC key is a miss.
    assert!(store.get_stored_zc_tx(&ZcKey::new(8)).unwrap().is_none());
}

// ----------------------------------------------------------------------
// Undo stubs
// ----------------------------------------------------------------------

#[test]
fn undo_data_is_unimplemented() {
    let dir = tempdir().unwrap();
    let store = open(dir.path(), Profile::Full);
    assert!(!store.put_stored_undo_data(1, 0, &[1, 2, 3]).unwrap());
    assert!(store.get_stored_undo_data(1, 0).unwrap().is_none());
}

// ----------------------------------------------------------------------
// Ordering property: engine iteration order == packed key order
// ----------------------------------------------------------------------

#[test]
fn blkdata_rows_iterate_in_component_order() {
    let dir = tempdir().unwrap();
    let store = open(dir.path(), Profile::Super);

    // Two blocks with bodies, inserted out of order.
    for (nonce, height) in [(2u32, 8u32), (1, 3)] {
        let txs = vec![tx(nonce as u8, 1), tx(nonce as u8 + 1, 1)];
        let mut sbh = StoredHeader::new(header(nonce), height);
        sbh.main_branch = true;
        sbh.num_tx = txs.len() as u32;
        for (i, t) in txs.iter().enumerate() {
            sbh.tx_map.insert(i as u16, StoredTx::from_tx(t, height, 0, i as u16));
        }
        store.put_stored_header(&mut sbh, true, true).unwrap();
    }

    let entries = store.get_all_database_entries(DbSelect::Blkdata).unwrap();
    let txdata_keys: Vec<&[u8]> = entries
        .iter()
        .map(|(k, _)| k.as_slice())
        .filter(|k| k.first() == Some(&0x03))
        .collect();

    let decoded: Vec<(u32, u8, Option<u16>, Option<u16>)> = txdata_keys
        .iter()
        .filter_map(|k| BlkDataKey::decode(k))
        .map(|bk| (bk.height(), bk.dup(), bk.tx_index, bk.tx_out_index))
        .collect();

    let mut sorted = decoded.clone();
    sorted.sort_unstable();
    assert_eq!(decoded, sorted, "engine order must match component order");
    assert_eq!(decoded.first().map(|&(h, ..)| h), Some(3));
    assert_eq!(decoded.last().map(|&(h, ..)| h), Some(8));
}

// ----------------------------------------------------------------------
// Serialization sanity against hand-built values
// ----------------------------------------------------------------------

#[test]
fn head_hgt_list_wire_format() {
    let mut hhl = StoredHeadHgtList::empty(100);
    hhl.add_dup_and_hash(0, BlockHash::from_byte_array([0xaa; 32]));
    hhl.add_dup_and_hash(1, BlockHash::from_byte_array([0xbb; 32]));
    hhl.set_preferred_dup(0);

    let bytes = hhl.encoded();
    let mut expected = vec![0x80u8];
    expected.extend_from_slice(&[0xaa; 32]);
    expected.push(0x01);
    expected.extend_from_slice(&[0xbb; 32]);
    assert_eq!(bytes, expected);
    assert_eq!(hex::encode(&bytes[..1]), "80");
}
