//! Tests for the offline wal-filter and wal-merge binaries.
//!
//! Flow: write a complete log, thin it with wal-filter, then repair the
//! thinned copy from the original with wal-merge and verify the round trip.

mod common;

use std::path::PathBuf;
use std::process::Command;

use common::{cleanup_dir, make_log, test_dir, write_log};
use metro_wal::wal::codec;

fn wal_filter_bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_wal-filter"))
}

fn wal_merge_bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_wal-merge"))
}

#[test]
fn filter_then_merge_restores_the_log() {
    let root = test_dir("offline");
    cleanup_dir(&root);
    std::fs::create_dir_all(&root).unwrap();

    let full_dir = root.join("full");
    let partial_dir = root.join("partial");
    let full = make_log("full", &(1..=12).collect::<Vec<u64>>(), 12);
    write_log(&full_dir, &full);

    let status = Command::new(wal_filter_bin())
        .arg("--input")
        .arg(&full_dir)
        .arg("--output")
        .arg(&partial_dir)
        .arg("--interval")
        .arg("3")
        .status()
        .expect("run wal-filter");
    assert!(status.success());

    let thinned = codec::read_node_log(&partial_dir, codec::Snapshot::default()).unwrap();
    let kept: Vec<u64> = thinned.entries.iter().map(|e| e.index).collect();
    // Positions 0, 3, 6, 9 of the original entries survive.
    assert_eq!(kept, vec![1, 4, 7, 10]);

    let status = Command::new(wal_merge_bin())
        .arg(&full_dir)
        .arg(&partial_dir)
        .status()
        .expect("run wal-merge");
    assert!(status.success());

    let repaired = codec::read_node_log(&partial_dir, codec::Snapshot::default()).unwrap();
    assert_eq!(repaired.entries, full.entries);
    assert_eq!(repaired.state, full.state);
    assert_eq!(repaired.metadata, full.metadata);

    cleanup_dir(&root);
}

#[test]
fn filter_rejects_zero_interval() {
    let root = test_dir("offline-bad-interval");
    cleanup_dir(&root);
    std::fs::create_dir_all(&root).unwrap();

    let full_dir = root.join("full");
    write_log(&full_dir, &make_log("full", &[1, 2, 3], 3));

    let output = Command::new(wal_filter_bin())
        .arg("--input")
        .arg(&full_dir)
        .arg("--output")
        .arg(root.join("out"))
        .arg("--interval")
        .arg("0")
        .output()
        .expect("run wal-filter");
    assert!(!output.status.success());

    cleanup_dir(&root);
}

#[test]
fn merge_fails_on_missing_provider() {
    let root = test_dir("offline-missing-provider");
    cleanup_dir(&root);
    std::fs::create_dir_all(&root).unwrap();

    let partial_dir = root.join("partial");
    write_log(&partial_dir, &make_log("partial", &[1, 2], 2));

    let output = Command::new(wal_merge_bin())
        .arg(root.join("absent"))
        .arg(&partial_dir)
        .output()
        .expect("run wal-merge");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("read provider log"), "stderr: {stderr}");

    cleanup_dir(&root);
}
