//! End-to-end sync cycles against a scaled-down fragment layout
//! (100 KiB cap, 1 KiB quantum).

use std::fs;
use std::path::Path;
use std::time::{Duration, SystemTime};

use filetime::{set_file_mtime, FileTime};
use tempfile::TempDir;

use cloudsaver_core::{SaveName, Settings, StampEntry};
use cloudsaver_sync::{resync, run_cycle, SessionState, SyncContext};

const KIB: usize = 1024;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn context(root: &TempDir) -> SyncContext {
    let saves = root.path().join("saves");
    let store = root.path().join("fragments");
    fs::create_dir_all(&saves).unwrap();
    fs::create_dir_all(&store).unwrap();
    let settings = Settings {
        max_fragment_bytes: 100 * KIB as u64,
        quantum_bytes: KIB as u64,
        ..Settings::default()
    };
    SyncContext::new(&settings, saves, store).unwrap()
}

fn at(secs: u64) -> SystemTime {
    SystemTime::UNIX_EPOCH + Duration::from_secs(secs)
}

fn write_save(dir: &Path, file: &str, bytes: &[u8], mtime: SystemTime) {
    let path = dir.join(file);
    fs::write(&path, bytes).unwrap();
    set_file_mtime(&path, FileTime::from_system_time(mtime)).unwrap();
}

fn store_listing(ctx: &SyncContext) -> Vec<(String, u64, SystemTime)> {
    let mut files: Vec<_> = fs::read_dir(ctx.store.dir())
        .unwrap()
        .map(|entry| {
            let entry = entry.unwrap();
            let meta = entry.metadata().unwrap();
            (
                entry.file_name().to_string_lossy().into_owned(),
                meta.len(),
                meta.modified().unwrap(),
            )
        })
        .collect();
    files.sort();
    files
}

#[test]
fn growing_save_is_refragmented_and_stamped() {
    init_logging();
    let root = TempDir::new().unwrap();
    let ctx = context(&root);
    let mut state = SessionState::default();

    write_save(&ctx.saves_dir, "foo.zip", &vec![1u8; 50 * KIB], at(1_000));
    run_cycle(&ctx, &mut state).unwrap();
    assert_eq!(
        store_listing(&ctx),
        vec![("foo.zip".to_string(), 50 * KIB as u64, at(1_000))]
    );

    let grown: Vec<u8> = (0..150 * KIB).map(|i| (i % 251) as u8).collect();
    write_save(&ctx.saves_dir, "foo.zip", &grown, at(2_000));
    let report = run_cycle(&ctx, &mut state).unwrap();
    assert_eq!(report.written, vec![(SaveName::from("foo"), 2)]);

    assert_eq!(
        store_listing(&ctx),
        vec![
            ("foo.firstof.2.zip".to_string(), 75 * KIB as u64, at(2_000)),
            ("foo.partidx.2.zip".to_string(), 75 * KIB as u64, at(2_000)),
        ]
    );
    assert_eq!(
        state.table[&SaveName::from("foo")],
        StampEntry {
            fragments: 2,
            total_size: 150 * KIB as u64,
            mtime: at(2_000),
        }
    );
    assert_eq!(
        ctx.store.read(&SaveName::from("foo"), 2).unwrap(),
        grown
    );
}

#[test]
fn unchanged_saves_are_not_rewritten() {
    init_logging();
    let root = TempDir::new().unwrap();
    let ctx = context(&root);
    let mut state = SessionState::default();

    write_save(&ctx.saves_dir, "a.zip", &vec![2u8; 230 * KIB], at(1_000));
    write_save(&ctx.saves_dir, "b.zip", &vec![3u8; 10], at(1_000));
    let first = run_cycle(&ctx, &mut state).unwrap();
    assert_eq!(first.written.len(), 2);
    let before = store_listing(&ctx);

    let second = run_cycle(&ctx, &mut state).unwrap();
    assert!(second.written.is_empty());
    assert!(second.removed.is_empty());
    assert_eq!(store_listing(&ctx), before);
}

#[test]
fn new_session_restores_from_store_after_local_loss() {
    init_logging();
    let root = TempDir::new().unwrap();
    let ctx = context(&root);

    let blob: Vec<u8> = (0..230 * KIB).map(|i| (i % 13) as u8).collect();
    write_save(&ctx.saves_dir, "world.zip", &blob, at(3_000));
    run_cycle(&ctx, &mut SessionState::default()).unwrap();
    fs::remove_file(ctx.saves_dir.join("world.zip")).unwrap();

    let mut state = SessionState::default();
    let report = resync(&ctx, &mut state).unwrap();
    assert_eq!(report.restored, vec![SaveName::from("world")]);
    assert!(report.cycle.written.is_empty());
    assert!(report.cycle.removed.is_empty());

    let restored = ctx.saves_dir.join("world.zip");
    assert_eq!(fs::read(&restored).unwrap(), blob);
    assert_eq!(fs::metadata(&restored).unwrap().modified().unwrap(), at(3_000));
}

#[test]
fn resync_drops_dangling_fragments() {
    init_logging();
    let root = TempDir::new().unwrap();
    let ctx = context(&root);
    fs::write(ctx.store.dir().join("save.firstof.3.zip"), b"a").unwrap();
    fs::write(ctx.store.dir().join("save.partidx.2.zip"), b"b").unwrap();

    let mut state = SessionState::default();
    let report = resync(&ctx, &mut state).unwrap();
    assert_eq!(report.pruned, vec![SaveName::from("save")]);
    assert!(state.table.is_empty());
    assert!(store_listing(&ctx).is_empty());
    assert!(!ctx.saves_dir.join("save.zip").exists());
}
