// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

mod subtests;

use mirror_db::{MemoryDB, Store};

#[test]
fn mem_put_get() {
    subtests::put_get(&MemoryDB::default());
}

#[test]
fn mem_overwrite_keeps_latest() {
    subtests::overwrite_keeps_latest(&MemoryDB::default());
}

#[test]
fn mem_exists_tracks_writes_and_deletes() {
    subtests::exists_tracks_writes_and_deletes(&MemoryDB::default());
}

#[test]
fn mem_delete_missing_is_a_noop() {
    subtests::delete_missing_is_a_noop(&MemoryDB::default());
}

#[test]
fn mem_empty_value_round_trip() {
    subtests::empty_value_round_trip(&MemoryDB::default());
}

#[test]
fn mem_bulk_write_then_read_back() {
    subtests::bulk_write_then_read_back(&MemoryDB::default());
}

#[test]
fn mem_bulk_read_reports_missing_keys() {
    subtests::bulk_read_reports_missing_keys(&MemoryDB::default());
}

#[test]
fn mem_bulk_delete_clears_all() {
    subtests::bulk_delete_clears_all(&MemoryDB::default());
}

#[test]
fn mem_clones_share_state() {
    // The mirror hands clones of the datastore to its store, syncer and
    // block server; they must all observe the same map.
    let db = MemoryDB::default();
    let other = db.clone();
    db.write(b"key", b"value").unwrap();
    assert_eq!(other.read(b"key").unwrap().unwrap(), b"value");
    other.delete(b"key").unwrap();
    assert!(!db.exists(b"key").unwrap());
}
