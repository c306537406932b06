use std::fs;

use tempfile::TempDir;
use vaultkb::scanner::{ChangeKind, FileScanner};

fn write(dir: &TempDir, name: &str, content: &str) {
    let path = dir.path().join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
}

#[test]
fn scan_reports_size_mtime_and_hash() {
    let dir = TempDir::new().unwrap();
    write(&dir, "note.md", "twelve bytes");

    let scanner = FileScanner::default();
    let files = scanner.scan_directory(dir.path(), true).unwrap();

    assert_eq!(files.len(), 1);
    assert_eq!(files[0].size, 12);
    assert!(files[0].mtime > 0.0);
    assert_eq!(files[0].content_hash.len(), 64);
}

#[test]
fn images_are_sighted_markdown_and_pictures_only() {
    let dir = TempDir::new().unwrap();
    write(&dir, "a.md", "text");
    write(&dir, "photo.jpg", "binary-ish");
    write(&dir, "shot.jpeg", "binary-ish");
    write(&dir, "diagram.png", "binary-ish");
    write(&dir, "data.csv", "1,2,3");

    let scanner = FileScanner::default();
    let files = scanner.scan_directory(dir.path(), true).unwrap();
    assert_eq!(files.len(), 4);
}

#[test]
fn one_modified_one_unchanged() {
    let dir = TempDir::new().unwrap();
    write(&dir, "doc1.md", "original body");
    write(&dir, "doc2.md", "stable body");

    let mut scanner = FileScanner::default();
    scanner.detect_changes(dir.path(), true).unwrap();

    write(&dir, "doc1.md", "edited body");
    let changes = scanner.detect_changes(dir.path(), true).unwrap();

    let modified: Vec<_> = changes
        .iter()
        .filter(|c| c.kind == ChangeKind::Modified)
        .collect();
    let unchanged: Vec<_> = changes
        .iter()
        .filter(|c| c.kind == ChangeKind::Unchanged)
        .collect();
    assert_eq!(modified.len(), 1);
    assert_eq!(unchanged.len(), 1);
    assert!(modified[0].path.ends_with("doc1.md"));
}

#[test]
fn touch_without_content_change_is_unchanged() {
    let dir = TempDir::new().unwrap();
    write(&dir, "same.md", "identical content");

    let mut scanner = FileScanner::default();
    scanner.detect_changes(dir.path(), true).unwrap();

    // Rewrite identical bytes: mtime moves, hash does not.
    write(&dir, "same.md", "identical content");
    let changes = scanner.detect_changes(dir.path(), true).unwrap();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].kind, ChangeKind::Unchanged);
}

#[test]
fn mixed_batch_of_changes() {
    let dir = TempDir::new().unwrap();
    write(&dir, "keep.md", "kept");
    write(&dir, "edit.md", "before");
    write(&dir, "drop.md", "doomed");

    let mut scanner = FileScanner::default();
    scanner.detect_changes(dir.path(), true).unwrap();

    write(&dir, "edit.md", "after");
    write(&dir, "fresh.md", "brand new");
    fs::remove_file(dir.path().join("drop.md")).unwrap();

    let changes = scanner.detect_changes(dir.path(), true).unwrap();
    let count = |kind: ChangeKind| changes.iter().filter(|c| c.kind == kind).count();

    assert_eq!(count(ChangeKind::New), 1);
    assert_eq!(count(ChangeKind::Modified), 1);
    assert_eq!(count(ChangeKind::Deleted), 1);
    assert_eq!(count(ChangeKind::Unchanged), 1);
}

#[test]
fn caches_are_per_instance() {
    let dir = TempDir::new().unwrap();
    write(&dir, "a.md", "content");

    let mut first = FileScanner::default();
    first.detect_changes(dir.path(), true).unwrap();

    // A second scanner has its own empty cache.
    let mut second = FileScanner::default();
    let changes = second.detect_changes(dir.path(), true).unwrap();
    assert_eq!(changes[0].kind, ChangeKind::New);
}

#[test]
fn vendor_directories_never_scanned() {
    let dir = TempDir::new().unwrap();
    write(&dir, ".obsidian/workspace.md", "internal");
    write(&dir, ".smart-env/cache.md", "internal");
    write(&dir, "real.md", "visible");

    let scanner = FileScanner::default();
    let files = scanner.scan_directory(dir.path(), true).unwrap();
    assert_eq!(files.len(), 1);
    assert!(files[0].path.ends_with("real.md"));
}
