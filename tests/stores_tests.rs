// Integration tests for the config and marker stores as seen by separate
// handles on the same files, the way two invocations of the tool see them.

use std::fs;
use std::sync::{Arc, Barrier};
use std::thread;

use homelab_setup::config::{keys, ConfigStore};
use homelab_setup::markers::{MarkerStore, StepStatus};
use homelab_setup::system::{DryRun, FileSystem, LocalFileSystem, Owner};

#[test]
fn test_value_survives_a_new_store_handle() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("homelab-setup.conf");

    ConfigStore::open(&path).expect("open").set(keys::HOMELAB_USER, "alice").expect("set");

    let reopened = ConfigStore::open(&path).expect("reopen");
    assert_eq!(reopened.get(keys::HOMELAB_USER).as_deref(), Some("alice"));
    assert_eq!(reopened.get_or_default(keys::NFS_MOUNT_POINT, "/fallback"), "/mnt/nas");
    assert_eq!(reopened.get_or_default("UNKNOWN_KEY", "/fallback"), "/fallback");
}

#[test]
fn test_legacy_file_from_older_release_is_upgraded() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("homelab-setup.conf");
    fs::write(&path, "# written by an older release\nSETUP_USER=core\nCONTAINERS_BASE=/var/srv\n")
        .expect("seed");

    let store = ConfigStore::open(&path).expect("open");
    assert_eq!(store.get(keys::HOMELAB_USER).as_deref(), Some("core"));
    assert_eq!(store.get(keys::HOMELAB_BASE_DIR).as_deref(), Some("/var/srv"));
    assert!(!store.exists(keys::LEGACY_SETUP_USER));

    let on_disk = fs::read_to_string(&path).expect("read");
    assert!(on_disk.contains("CONFIG_VERSION=2\n"));
    assert!(on_disk.contains("HOMELAB_USER=core\n"));
    assert!(!on_disk.lines().any(|l| l.starts_with("SETUP_USER=") || l.starts_with("CONTAINERS_BASE=")));
}

#[test]
fn test_racing_marker_creation_has_one_winner_across_handles() {
    let dir = tempfile::tempdir().expect("tempdir");
    let threads = 8;
    let barrier = Arc::new(Barrier::new(threads));

    let handles: Vec<_> = (0..threads)
        .map(|_| {
            // Each thread gets its own store, like separate processes would
            let store = MarkerStore::new(dir.path().join("markers"));
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                store.create_if_not_exists("container-setup-complete").expect("create")
            })
        })
        .collect();

    let winners = handles
        .into_iter()
        .map(|h| h.join().expect("join"))
        .filter(|created| *created)
        .count();
    assert_eq!(winners, 1);
}

#[test]
fn test_failed_wins_over_completed() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = MarkerStore::new(dir.path());
    store.create("nfs-setup-complete").expect("create");
    store.mark_failed("nfs-setup-complete").expect("fail");
    assert_eq!(store.status("nfs-setup-complete").expect("status"), StepStatus::Failed);

    store.clear_failure("nfs-setup-complete").expect("clear");
    assert_eq!(store.status("nfs-setup-complete").expect("status"), StepStatus::Completed);
}

#[test]
fn test_legacy_reconciliation_is_idempotent() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = MarkerStore::new(dir.path());
    store.create("deployment-complete").expect("legacy");

    for _ in 0..2 {
        assert!(store
            .ensure_canonical("service-deployment-complete", &["deployment-complete"])
            .expect("reconcile"));
    }
    assert_eq!(store.list().expect("list"), vec!["service-deployment-complete"]);
}

#[test]
fn test_dry_run_reads_match_live_reads() {
    let dir = tempfile::tempdir().expect("tempdir");
    let file = dir.path().join("fstab");
    fs::write(&file, "nas:/media /mnt/nas nfs defaults 0 0\n").expect("seed");

    let live = LocalFileSystem::new();
    let dry = DryRun::new(LocalFileSystem::new(), true);

    assert_eq!(live.file_exists(&file).expect("live"), dry.file_exists(&file).expect("dry"));
    assert_eq!(live.read_to_string(&file).expect("live"), dry.read_to_string(&file).expect("dry"));
    assert_eq!(live.permissions(&file).expect("live"), dry.permissions(&file).expect("dry"));
    assert_eq!(live.owner(&file).expect("live"), dry.owner(&file).expect("dry"));
    assert_eq!(live.list_directory(dir.path()).expect("live"), dry.list_directory(dir.path()).expect("dry"));

    // Mutations are logged only
    dry.ensure_directory(&dir.path().join("new"), Some(Owner::new(0, 0)), 0o755).expect("dry mkdir");
    dry.write_file(&file, b"replaced", 0o600).expect("dry write");
    dry.remove_directory(dir.path()).expect("dry rmdir");
    assert!(!dir.path().join("new").exists());
    assert_eq!(
        fs::read_to_string(&file).expect("read"),
        "nas:/media /mnt/nas nfs defaults 0 0\n"
    );
}
