// Integration tests for the file state store: ordering, sidecars and package extraction

use common::file_store::{read_status, sidecar_path, FileQuery, FileStateStore};
use common::models::{DataMessage, MessageStatus, OrderBy};
use common::retry::FixedDelay;
use proptest::prelude::*;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

fn store() -> FileStateStore {
    FileStateStore::new(
        FixedDelay::new(Duration::from_millis(10), 3),
        CancellationToken::new(),
    )
}

fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
    let file = fs::File::create(path).unwrap();
    let mut writer = ZipWriter::new(file);
    for (name, contents) in entries {
        writer
            .start_file(name.to_string(), SimpleFileOptions::default())
            .unwrap();
        writer.write_all(contents).unwrap();
    }
    writer.finish().unwrap();
}

fn names(messages: impl IntoIterator<Item = DataMessage>) -> Vec<String> {
    messages.into_iter().map(|m| m.name).collect()
}

// ============================================================================
// Enumeration
// ============================================================================

#[tokio::test]
async fn test_enumerate_orders_by_file_name() {
    let dir = tempfile::tempdir().unwrap();
    for name in ["b.csv", "C.csv", "a.csv", "notes.txt"] {
        fs::write(dir.path().join(name), name).unwrap();
    }

    let query = FileQuery::new(dir.path(), "*.csv").order(OrderBy::FileName, false);
    let listing = store().enumerate(&query, MessageStatus::Input).await.unwrap();
    let messages: Vec<DataMessage> = listing.collect();

    assert!(messages.iter().all(|m| m.message_status == MessageStatus::Input));
    let listed = names(messages);
    assert_eq!(listed.len(), 3);
    assert!(!listed.contains(&"notes.txt".to_string()));

    let reversed = store()
        .enumerate(&query.clone().order(OrderBy::FileName, true), MessageStatus::Input)
        .await
        .unwrap();
    let mut expected = listed.clone();
    expected.reverse();
    assert_eq!(names(reversed), expected);
}

#[tokio::test]
async fn test_enumerate_missing_directory_is_empty() {
    let dir = tempfile::tempdir().unwrap();
    let query = FileQuery::new(dir.path().join("absent"), "*.*");
    let listing = store().enumerate(&query, MessageStatus::Input).await.unwrap();
    assert_eq!(listing.count(), 0);
}

// ============================================================================
// Transitions and sidecars
// ============================================================================

#[tokio::test]
async fn test_sidecar_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let data = dir.path().join("customers.csv");
    fs::write(&data, "a,b").unwrap();

    let message = DataMessage::from_path(&data, MessageStatus::Enqueued).with_message_id("MSG-9");
    let sidecar = store().write_status(&message, ".Status").await.unwrap();
    assert_eq!(sidecar, sidecar_path(&data, ".Status"));
    assert_eq!(sidecar.file_name().unwrap(), "customers.Status");

    let query = FileQuery::new(dir.path(), "*.Status");
    let read_back = store().enumerate_status_files(&query).await.unwrap();
    assert_eq!(read_back.len(), 1);
    assert_eq!(read_back[0].name, "customers.csv");
    assert_eq!(read_back[0].full_path, data.to_string_lossy());
    assert_eq!(read_back[0].message_id.as_deref(), Some("MSG-9"));
    assert_eq!(read_back[0].message_status, MessageStatus::Enqueued);

    let raw = fs::read_to_string(&sidecar).unwrap();
    assert!(raw.contains("\"MessageStatus\": \"Enqueued\""));
    assert_eq!(read_status(&sidecar).unwrap(), message);
}

#[tokio::test]
async fn test_transition_moves_into_missing_folder() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("in").join("orders.xml");
    fs::create_dir_all(source.parent().unwrap()).unwrap();
    fs::write(&source, "<orders/>").unwrap();

    let message = DataMessage::from_path(&source, MessageStatus::Input);
    let target = dir.path().join("done").join("nested").join("orders.xml");
    let moved = store()
        .transition(&message, &target, MessageStatus::Succeeded)
        .await
        .unwrap();

    assert!(!source.exists());
    assert_eq!(fs::read_to_string(&target).unwrap(), "<orders/>");
    assert_eq!(moved.path(), target);
    assert_eq!(moved.message_status, MessageStatus::Succeeded);
    assert_eq!(message.message_status, MessageStatus::Input);
}

#[tokio::test]
async fn test_move_with_sidecar_deletes_status_file() {
    let dir = tempfile::tempdir().unwrap();
    let data = dir.path().join("items.csv");
    fs::write(&data, "x").unwrap();
    fs::write(sidecar_path(&data, ".Status"), "{}").unwrap();

    let target = dir.path().join("processed").join("items.csv");
    store()
        .move_with_sidecar(&data, &target, true, ".Status")
        .await
        .unwrap();

    assert!(target.exists());
    assert!(!sidecar_path(&data, ".Status").exists());
    assert!(!sidecar_path(&target, ".Status").exists());
}

// ============================================================================
// Package extraction
// ============================================================================

#[tokio::test]
async fn test_extraction_skips_traversal_and_manifest_entries() {
    let root = tempfile::tempdir().unwrap();
    let package_dir = root.path().join("download");
    fs::create_dir_all(&package_dir).unwrap();
    let package = package_dir.join("package.zip");
    write_zip(
        &package,
        &[
            ("Manifest.xml", b"<manifest/>"),
            ("PackageHeader.xml", b"<header/>"),
            ("Customers.csv", b"id,name\n1,Contoso\n"),
            ("..\\evil.txt", b"escape"),
            ("../evil2.txt", b"escape"),
        ],
    );

    let report = store().extract_archive(&package, false, false).await.unwrap();

    assert_eq!(report.extracted.len(), 1);
    assert!(report.extracted[0].ends_with("Customers.csv"));
    assert_eq!(report.skipped.len(), 2);
    assert!(package_dir.join("Customers.csv").exists());
    assert!(!package_dir.join("Manifest.xml").exists());
    assert!(!root.path().join("evil.txt").exists());
    assert!(!root.path().join("evil2.txt").exists());
    assert!(package.exists());
}

#[tokio::test]
async fn test_extraction_with_timestamp_prefix_and_delete() {
    let dir = tempfile::tempdir().unwrap();
    let package = dir.path().join("2024-03-01_10-00-00-0001.zip");
    write_zip(&package, &[("Vendors.csv", b"id\n1\n")]);

    let report = store().extract_archive(&package, true, true).await.unwrap();

    assert_eq!(report.extracted.len(), 1);
    assert!(dir
        .path()
        .join("2024-03-01_10-00-00-0001-Vendors.csv")
        .exists());
    assert!(!package.exists());
}

// ============================================================================
// Ordering properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// *For any* set of distinct lower-case file names, name ordering yields
    /// them sorted, and reversed ordering yields exactly the opposite sequence.
    #[test]
    fn property_name_ordering_is_sorted(
        stems in proptest::collection::btree_set("[a-z]{1,8}", 1..12)
    ) {
        let dir = tempfile::tempdir().unwrap();
        for stem in &stems {
            fs::write(dir.path().join(format!("{}.dat", stem)), stem).unwrap();
        }

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let query = FileQuery::new(dir.path(), "*.dat").order(OrderBy::FileName, false);
        let forward = runtime
            .block_on(store().enumerate(&query, MessageStatus::Input))
            .unwrap();
        let backward = runtime
            .block_on(store().enumerate(&query.clone().order(OrderBy::FileName, true), MessageStatus::Input))
            .unwrap();

        let expected: Vec<String> = stems.iter().map(|s| format!("{}.dat", s)).collect();
        let forward = names(forward);
        let mut backward = names(backward);
        backward.reverse();

        prop_assert_eq!(&forward, &expected);
        prop_assert_eq!(backward, expected);
    }
}
