//! Boundary scenarios: an empty-previous-snapshot run, an unchanged-file
//! second run (relying on the server's mtime-based linking decision), a
//! modified-file second run, and a bare empty-root framing round-trip.

use std::os::unix::fs::MetadataExt;
use std::os::unix::net::UnixStream;

use faub::channel::FramedChannel;
use faub::protocol::client::run_client;
use faub::protocol::server::run_server;

fn run_once(
    source: &std::path::Path,
    staging: &std::path::Path,
    previous_snapshot: Option<&std::path::Path>,
) -> faub::protocol::RunReport {
    let (client_sock, server_sock) = UnixStream::pair().unwrap();

    let source = source.to_path_buf();
    let client = std::thread::spawn(move || {
        let mut channel = FramedChannel::new(client_sock);
        run_client(&mut channel, &source).unwrap()
    });

    let mut server_channel = FramedChannel::new(server_sock);
    let report = run_server(&mut server_channel, staging, previous_snapshot).unwrap();

    let _ = client.join().unwrap();
    report
}

#[test]
fn scenario_1_empty_previous_snapshot() {
    let source = tempfile::tempdir().unwrap();
    std::fs::write(source.path().join("a.txt"), b"0123456789").unwrap();

    let backup1 = tempfile::tempdir().unwrap();
    let staging1 = backup1.path().join(".staging");

    let report = run_once(source.path(), &staging1, None);

    assert_eq!(report.bodies_transferred, 1);
    assert_eq!(report.bodies_linked, 0);
    assert_eq!(report.modified_files, vec!["a.txt".to_string()]);
    assert_eq!(
        std::fs::read(staging1.join("a.txt")).unwrap(),
        b"0123456789"
    );
}

#[test]
fn scenario_2_unchanged_file_links_on_second_run() {
    let source = tempfile::tempdir().unwrap();
    std::fs::write(source.path().join("a.txt"), b"0123456789").unwrap();

    let backups_root = tempfile::tempdir().unwrap();
    let snapshot1 = backups_root.path().join("snap1");
    run_once(source.path(), &snapshot1, None);

    let snapshot2 = backups_root.path().join("snap2");
    let report2 = run_once(source.path(), &snapshot2, Some(&snapshot1));

    assert_eq!(report2.bodies_linked, 1);
    assert_eq!(report2.bodies_transferred, 0);
    assert!(report2.modified_files.is_empty());

    let meta1 = std::fs::metadata(snapshot1.join("a.txt")).unwrap();
    let meta2 = std::fs::metadata(snapshot2.join("a.txt")).unwrap();
    assert_eq!(meta1.ino(), meta2.ino());
}

#[test]
fn scenario_3_modified_file_is_retransferred_not_linked() {
    let source = tempfile::tempdir().unwrap();
    std::fs::write(source.path().join("a.txt"), b"0123456789").unwrap();

    let backups_root = tempfile::tempdir().unwrap();
    let snapshot1 = backups_root.path().join("snap1");
    run_once(source.path(), &snapshot1, None);

    // Bump the mtime forward so the server's decision sees a mismatch even
    // though nothing else about the entry changed.
    let bumped = std::fs::metadata(source.path().join("a.txt")).unwrap().mtime() + 60;
    let ts = nix::sys::time::TimeSpec::new(bumped, 0);
    let file = std::fs::File::open(source.path().join("a.txt")).unwrap();
    nix::sys::stat::futimens(&file, &ts, &ts).unwrap();
    drop(file);

    let snapshot2 = backups_root.path().join("snap2");
    let report2 = run_once(source.path(), &snapshot2, Some(&snapshot1));

    assert_eq!(report2.bodies_linked, 0);
    assert_eq!(report2.bodies_transferred, 1);
    assert_eq!(report2.modified_files, vec!["a.txt".to_string()]);

    let meta1 = std::fs::metadata(snapshot1.join("a.txt")).unwrap();
    let meta2 = std::fs::metadata(snapshot2.join("a.txt")).unwrap();
    assert_ne!(meta1.ino(), meta2.ino());
}

#[test]
fn scenario_4_directory_mtime_is_deferred_not_clobbered() {
    let source = tempfile::tempdir().unwrap();
    std::fs::create_dir(source.path().join("sub")).unwrap();
    std::fs::write(source.path().join("sub/a.txt"), b"x").unwrap();

    let dir_meta = std::fs::metadata(source.path().join("sub")).unwrap();
    let expected_mtime = dir_meta.mtime();

    let backup = tempfile::tempdir().unwrap();
    let staging = backup.path().join(".staging");
    run_once(source.path(), &staging, None);

    let staged_dir_meta = std::fs::metadata(staging.join("sub")).unwrap();
    assert_eq!(staged_dir_meta.mtime(), expected_mtime);
}

#[test]
fn scenario_6_empty_root_sentinel_short_circuits() {
    let source = tempfile::tempdir().unwrap();
    let staging = tempfile::tempdir().unwrap();

    let report = run_once(source.path(), &staging.path().join("out"), None);
    assert!(report.empty_root);
    assert_eq!(report.entries_seen, 0);
}
