//! Cache mirror tests against real temporary directory trees

use comfy_deploy::{DeployError, MirrorReport, mirror_tree};
use std::os::unix::fs::symlink;
use std::path::Path;
use tempfile::TempDir;

/// Create `cache/` and `models/` under a fresh temp dir
fn layout() -> (TempDir, std::path::PathBuf, std::path::PathBuf) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let source = temp_dir.path().join("cache");
    let target = temp_dir.path().join("models");
    std::fs::create_dir_all(&source).unwrap();
    (temp_dir, source, target)
}

fn write(path: &Path, content: &[u8]) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

#[test]
fn test_nested_file_is_linked() {
    let (_temp_dir, source, target) = layout();
    write(&source.join("a/b.bin"), b"weights");

    let report = mirror_tree(&source, &target).unwrap();

    let link = target.join("a/b.bin");
    assert!(link.is_symlink());
    assert_eq!(std::fs::read_link(&link).unwrap(), source.join("a/b.bin"));
    assert_eq!(std::fs::read(&link).unwrap(), b"weights");
    assert!(!target.join("a").is_symlink());
    assert_eq!(
        report,
        MirrorReport {
            created: 1,
            replaced: 0,
            skipped: 0
        }
    );
}

#[test]
fn test_rerun_is_idempotent() {
    let (_temp_dir, source, target) = layout();
    write(&source.join("checkpoints/sdxl.safetensors"), b"1");
    write(&source.join("loras/style.safetensors"), b"2");
    write(&source.join("top.bin"), b"3");

    let first = mirror_tree(&source, &target).unwrap();
    let second = mirror_tree(&source, &target).unwrap();

    assert_eq!(first.created, 3);
    assert_eq!(second.created, 0);
    assert_eq!(second.replaced, 3);
    assert_eq!(second.skipped, 0);

    let entries: Vec<_> = std::fs::read_dir(target.join("loras"))
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .collect();
    assert_eq!(entries, vec!["style.safetensors"]);
    assert_eq!(
        std::fs::read_link(target.join("top.bin")).unwrap(),
        source.join("top.bin")
    );
}

#[test]
fn test_real_file_left_untouched() {
    let (_temp_dir, source, target) = layout();
    write(&source.join("a/b.bin"), b"from cache");
    write(&target.join("a/b.bin"), b"user file");

    let report = mirror_tree(&source, &target).unwrap();

    let existing = target.join("a/b.bin");
    assert!(!existing.is_symlink());
    assert_eq!(std::fs::read(&existing).unwrap(), b"user file");
    assert_eq!(report.skipped, 1);
    assert_eq!(report.linked(), 0);
}

#[test]
fn test_existing_symlink_elsewhere_is_repointed() {
    let (temp_dir, source, target) = layout();
    write(&source.join("vae/ae.safetensors"), b"new");
    write(&temp_dir.path().join("old/ae.safetensors"), b"old");
    std::fs::create_dir_all(target.join("vae")).unwrap();
    symlink(
        temp_dir.path().join("old/ae.safetensors"),
        target.join("vae/ae.safetensors"),
    )
    .unwrap();

    let report = mirror_tree(&source, &target).unwrap();

    assert_eq!(report.replaced, 1);
    assert_eq!(
        std::fs::read(target.join("vae/ae.safetensors")).unwrap(),
        b"new"
    );
}

#[test]
fn test_app_files_next_to_links_survive() {
    let (_temp_dir, source, target) = layout();
    write(&source.join("checkpoints/cached.safetensors"), b"c");
    write(&target.join("checkpoints/put_checkpoints_here"), b"");

    mirror_tree(&source, &target).unwrap();

    assert!(target.join("checkpoints/put_checkpoints_here").is_file());
    assert!(!target.join("checkpoints/put_checkpoints_here").is_symlink());
    assert!(target.join("checkpoints/cached.safetensors").is_symlink());
}

#[test]
fn test_target_inside_source_is_rejected() {
    let (_temp_dir, source, _) = layout();
    write(&source.join("vae/ae.bin"), b"w");

    let err = mirror_tree(&source, &source.join("out")).unwrap_err();

    assert!(matches!(err, DeployError::MirrorTargetInsideSource { .. }));
    assert!(!source.join("out").exists());
}

#[test]
fn test_target_inside_source_via_dotdot_is_rejected() {
    let (temp_dir, source, _) = layout();
    write(&source.join("a.bin"), b"w");

    std::fs::create_dir_all(temp_dir.path().join("models")).unwrap();
    let sneaky = temp_dir.path().join("models/../cache/nested");
    let err = mirror_tree(&source, &sneaky).unwrap_err();
    assert!(matches!(err, DeployError::MirrorTargetInsideSource { .. }));

    let err = mirror_tree(&source, &source).unwrap_err();
    assert!(matches!(err, DeployError::MirrorTargetInsideSource { .. }));
}

#[test]
fn test_dangling_cache_symlink_is_still_linked() {
    let (temp_dir, source, target) = layout();
    write(&source.join("loras/real.safetensors"), b"r");
    symlink(
        temp_dir.path().join("elsewhere/missing.safetensors"),
        source.join("loras/broken.safetensors"),
    )
    .unwrap();

    let report = mirror_tree(&source, &target).unwrap();

    assert_eq!(report.created, 2);
    assert_eq!(
        std::fs::read_link(target.join("loras/broken.safetensors")).unwrap(),
        source.join("loras/broken.safetensors")
    );
}

#[test]
fn test_directory_symlink_in_cache_is_not_linked() {
    let (temp_dir, source, target) = layout();
    write(&temp_dir.path().join("shared/x.bin"), b"x");
    symlink(temp_dir.path().join("shared"), source.join("shared")).unwrap();

    let report = mirror_tree(&source, &target).unwrap();

    assert_eq!(report, MirrorReport::default());
    assert!(!target.join("shared").exists());
}
