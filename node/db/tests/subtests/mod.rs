// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Behavioural checks shared by every `Store` backend.

use mirror_db::Store;

pub fn put_get<DB: Store>(db: &DB) {
    db.write(b"head", b"bafy-head").unwrap();
    assert_eq!(db.read(b"head").unwrap().unwrap(), b"bafy-head");
    assert!(db.read(b"mapping/unknown").unwrap().is_none());
}

pub fn overwrite_keeps_latest<DB: Store>(db: &DB) {
    db.write(b"head", b"first").unwrap();
    db.write(b"head", b"second").unwrap();
    assert_eq!(db.read(b"head").unwrap().unwrap(), b"second");
}

pub fn exists_tracks_writes_and_deletes<DB: Store>(db: &DB) {
    let key = b"blocks/bafyexample";
    assert!(!db.exists(key).unwrap());
    db.write(key, b"block bytes").unwrap();
    assert!(db.exists(key).unwrap());
    db.delete(key).unwrap();
    assert!(!db.exists(key).unwrap());
    assert!(db.read(key).unwrap().is_none());
}

pub fn delete_missing_is_a_noop<DB: Store>(db: &DB) {
    db.delete(b"never-written").unwrap();
    assert!(!db.exists(b"never-written").unwrap());
}

pub fn empty_value_round_trip<DB: Store>(db: &DB) {
    db.write(b"chunkcache", b"").unwrap();
    assert!(db.exists(b"chunkcache").unwrap());
    assert_eq!(db.read(b"chunkcache").unwrap().unwrap(), Vec::<u8>::new());
}

pub fn bulk_write_then_read_back<DB: Store>(db: &DB) {
    let pairs: Vec<(String, Vec<u8>)> = (0..5)
        .map(|i| (format!("mapping/ad-{i}"), format!("mirror-{i}").into_bytes()))
        .collect();
    db.bulk_write(pairs.iter().map(|(k, v)| (k.as_bytes(), v.as_slice())))
        .unwrap();

    let keys: Vec<&[u8]> = pairs.iter().map(|(k, _)| k.as_bytes()).collect();
    let got = db.bulk_read(&keys).unwrap();
    assert_eq!(got.len(), pairs.len());
    for ((_, want), got) in pairs.iter().zip(got) {
        assert_eq!(got.as_deref(), Some(want.as_slice()));
    }
}

pub fn bulk_read_reports_missing_keys<DB: Store>(db: &DB) {
    db.write(b"present", b"yes").unwrap();
    let got = db
        .bulk_read(&[b"present".as_slice(), b"absent".as_slice()])
        .unwrap();
    assert_eq!(got[0].as_deref(), Some(b"yes".as_slice()));
    assert!(got[1].is_none());
}

pub fn bulk_delete_clears_all<DB: Store>(db: &DB) {
    let keys = [b"a".as_slice(), b"b".as_slice(), b"c".as_slice()];
    db.bulk_write(keys.iter().map(|k| (*k, *k))).unwrap();
    db.bulk_delete(&keys).unwrap();
    for key in keys {
        assert!(!db.exists(key).unwrap());
    }
}
