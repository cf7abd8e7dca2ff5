//! Integration tests: the aggregate projection end to end on a real
//! directory tree.
//!
//! Builds the dated-backup layout the default policy recognizes
//! (`backup/2024_01_01-00_00_00/databases/mysql/app/`) in a tempdir and
//! exercises attribute synthesis, listing, and range reads — including the
//! boundary-straddling read and the member-removed-between-calls race.

use std::path::{Path, PathBuf};

use tempfile::TempDir;

use dumpfs_core::config::OverlayConfig;
use dumpfs_core::DumpfsError;
use dumpfs_overlay::{list_members, AggregatePolicy, Overlay, Resolved};

/// `{tmp}/backup/2024_01_01-00_00_00/databases/mysql/app` with two dumps:
/// schema.sql (100 B) and data.sql (5000 B).
fn build_backup_tree(tmp: &TempDir) -> PathBuf {
    let app = tmp
        .path()
        .join("backup/2024_01_01-00_00_00/databases/mysql/app");
    std::fs::create_dir_all(&app).expect("create backup tree");
    std::fs::write(app.join("schema.sql"), vec![b's'; 100]).unwrap();
    std::fs::write(app.join("data.sql"), vec![b'd'; 5000]).unwrap();
    std::fs::write(app.join("notes.txt"), b"not a dump").unwrap();
    app
}

fn strict_overlay(root: &Path) -> Overlay {
    let policy = AggregatePolicy::from_config(&OverlayConfig::default()).unwrap();
    Overlay::new(root, policy)
}

/// The concatenation in the same enumeration order the overlay uses.
async fn expected_concat(dir: &Path, overlay: &Overlay) -> Vec<u8> {
    let members = list_members(dir, overlay.policy()).await.unwrap();
    let mut all = Vec::new();
    for m in &members {
        all.extend_from_slice(&std::fs::read(&m.path).unwrap());
    }
    all
}

#[tokio::test]
async fn aggregate_size_is_member_sum() {
    let tmp = TempDir::new().unwrap();
    let app = build_backup_tree(&tmp);
    let overlay = strict_overlay(tmp.path());

    let attrs = overlay.synthetic_attrs(&app).await.unwrap();
    assert_eq!(attrs.size, 5100);
    assert_eq!(attrs.nlink, 1);
    assert!(attrs.mode.is_some());
}

#[tokio::test]
async fn full_read_equals_concatenation_in_enumeration_order() {
    let tmp = TempDir::new().unwrap();
    let app = build_backup_tree(&tmp);
    let overlay = strict_overlay(tmp.path());

    let expected = expected_concat(&app, &overlay).await;
    let attrs = overlay.synthetic_attrs(&app).await.unwrap();
    assert_eq!(attrs.size as usize, expected.len());

    let data = overlay.read_synthetic(&app, 0, attrs.size as usize).await.unwrap();
    assert_eq!(data, expected);
}

#[tokio::test]
async fn boundary_straddling_read() {
    let tmp = TempDir::new().unwrap();
    let app = build_backup_tree(&tmp);
    let overlay = strict_overlay(tmp.path());

    let expected = expected_concat(&app, &overlay).await;

    // 20 bytes straddling the 100-byte boundary between the two dumps
    // (when schema.sql enumerates first: 10×'s' followed by 10×'d').
    let data = overlay.read_synthetic(&app, 90, 20).await.unwrap();
    assert_eq!(data, &expected[90..110]);
}

#[tokio::test]
async fn reads_are_prefix_consistent_slices() {
    let tmp = TempDir::new().unwrap();
    let app = build_backup_tree(&tmp);
    let overlay = strict_overlay(tmp.path());

    for (offset, length) in [(0u64, 1usize), (1, 99), (99, 2), (100, 5000), (5000, 100), (4242, 17)] {
        let slice = overlay.read_synthetic(&app, offset, length).await.unwrap();
        let prefix = overlay
            .read_synthetic(&app, 0, offset as usize + length)
            .await
            .unwrap();
        assert_eq!(
            slice,
            &prefix[offset as usize..],
            "read({offset}, {length}) must equal read(0, {})[{offset}..]",
            offset as usize + length
        );
    }
}

#[tokio::test]
async fn offset_at_or_past_size_reads_empty() {
    let tmp = TempDir::new().unwrap();
    let app = build_backup_tree(&tmp);
    let overlay = strict_overlay(tmp.path());

    assert!(overlay.read_synthetic(&app, 5100, 1).await.unwrap().is_empty());
    assert!(overlay.read_synthetic(&app, 99999, 4096).await.unwrap().is_empty());
}

#[tokio::test]
async fn zero_member_directory_offers_no_aggregate() {
    let tmp = TempDir::new().unwrap();
    let empty = tmp
        .path()
        .join("backup/2024_01_01-00_00_00/databases/psql/empty");
    std::fs::create_dir_all(&empty).unwrap();
    std::fs::write(empty.join("notes.txt"), b"no dumps here").unwrap();
    let overlay = strict_overlay(tmp.path());

    assert_eq!(overlay.synthetic_entry(&empty).await, None);
    match overlay.synthetic_attrs(&empty).await {
        Err(DumpfsError::NoSuchEntry(_)) => {}
        other => panic!("expected NoSuchEntry, got {other:?}"),
    }
}

#[tokio::test]
async fn eligible_directory_lists_its_synthetic_name() {
    let tmp = TempDir::new().unwrap();
    let app = build_backup_tree(&tmp);
    let overlay = strict_overlay(tmp.path());

    assert_eq!(
        overlay.synthetic_entry(&app).await.as_deref(),
        Some("app_DB_DUMP.sql")
    );
}

#[tokio::test]
async fn strict_validation_rejects_unrecognized_shapes() {
    let tmp = TempDir::new().unwrap();
    let loose = tmp.path().join("loose/app");
    std::fs::create_dir_all(&loose).unwrap();
    std::fs::write(loose.join("a.sql"), b"select 1;").unwrap();

    let strict = strict_overlay(tmp.path());
    assert_eq!(strict.synthetic_entry(&loose).await, None);

    // With validation off the same directory becomes eligible.
    let lax_policy = AggregatePolicy::from_config(&OverlayConfig {
        strict_path_validation: false,
        ..OverlayConfig::default()
    })
    .unwrap();
    let lax = Overlay::new(tmp.path(), lax_policy);
    assert_eq!(lax.synthetic_entry(&loose).await.as_deref(), Some("app_DB_DUMP.sql"));
}

#[tokio::test]
async fn resolve_recognizes_only_matching_synthetic_names() {
    let tmp = TempDir::new().unwrap();
    build_backup_tree(&tmp);
    let overlay = strict_overlay(tmp.path());

    let base = "/backup/2024_01_01-00_00_00/databases/mysql/app";

    match overlay.resolve(&format!("{base}/app_DB_DUMP.sql")).await {
        Resolved::Synthetic { dir } => {
            assert!(dir.ends_with("databases/mysql/app"));
        }
        other => panic!("expected Synthetic, got {other:?}"),
    }

    // Stem does not match the parent directory name → passthrough.
    match overlay.resolve(&format!("{base}/other_DB_DUMP.sql")).await {
        Resolved::Real(_) => {}
        other => panic!("expected Real, got {other:?}"),
    }

    // Ordinary member file → passthrough.
    match overlay.resolve(&format!("{base}/schema.sql")).await {
        Resolved::Real(_) => {}
        other => panic!("expected Real, got {other:?}"),
    }
}

#[tokio::test]
async fn member_removed_between_stat_and_read_is_not_served_stale() {
    let tmp = TempDir::new().unwrap();
    let app = build_backup_tree(&tmp);
    let overlay = strict_overlay(tmp.path());

    let attrs = overlay.synthetic_attrs(&app).await.unwrap();
    assert_eq!(attrs.size, 5100);

    std::fs::remove_file(app.join("data.sql")).unwrap();

    // A later read re-derives membership: the result reflects the smaller
    // aggregate (or would error if the member vanished mid-walk) — it never
    // replays bytes of the deleted member.
    let data = overlay.read_synthetic(&app, 0, 5100).await.unwrap();
    assert_eq!(data, vec![b's'; 100]);
}

#[tokio::test]
async fn real_file_named_like_the_aggregate_is_not_double_counted() {
    let tmp = TempDir::new().unwrap();
    let app = build_backup_tree(&tmp);
    let overlay = strict_overlay(tmp.path());

    // A stray on-disk file carrying the synthetic name: shadowed by the
    // projection, excluded from membership.
    std::fs::write(app.join("app_DB_DUMP.sql"), vec![b'!'; 999]).unwrap();

    let attrs = overlay.synthetic_attrs(&app).await.unwrap();
    assert_eq!(attrs.size, 5100);

    let members = list_members(&app, overlay.policy()).await.unwrap();
    assert!(members.iter().all(|m| m.name != "app_DB_DUMP.sql"));
}
