// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use super::*;
use crate::session::Method;

fn record(handle: &str) -> SessionRecord {
    SessionRecord::new(handle.to_owned(), Method::CommandLine, None)
}

#[test]
fn memory_insert_get_update_remove() -> anyhow::Result<()> {
    let mut store = MemoryStore::new();
    store.insert(record("a"))?;
    store.insert(record("b"))?;
    assert_eq!(store.len(), 2);

    let mut a = store.get("a").ok_or_else(|| anyhow::anyhow!("missing a"))?;
    a.complete("tok".into())?;
    store.update(a)?;
    assert_eq!(store.get("a").and_then(|r| r.token), Some("tok".to_owned()));

    let removed = store.remove(&["a".to_owned(), "zzz".to_owned()])?;
    assert_eq!(removed, 1);
    assert!(store.get("a").is_none());
    assert_eq!(store.len(), 1);
    Ok(())
}

#[test]
fn duplicate_handle_is_rejected() -> anyhow::Result<()> {
    let mut store = MemoryStore::new();
    store.insert(record("dup"))?;
    crate::assert_err_contains!(store.insert(record("dup")), "duplicate");
    Ok(())
}

#[test]
fn update_of_unknown_handle_fails() -> anyhow::Result<()> {
    let mut store = MemoryStore::new();
    crate::assert_err_contains!(store.update(record("ghost")), "unknown");
    Ok(())
}

#[test]
fn ages_are_relative_to_now() -> anyhow::Result<()> {
    let mut store = MemoryStore::new();
    let mut old = record("old");
    old.created_at = 1_000;
    let mut new = record("new");
    new.created_at = 9_000;
    store.insert(old)?;
    store.insert(new)?;

    let mut ages = store.ages(10_000);
    ages.sort();
    assert_eq!(
        ages,
        vec![
            ("new".to_owned(), Duration::from_millis(1_000)),
            ("old".to_owned(), Duration::from_millis(9_000)),
        ]
    );
    Ok(())
}

#[test]
fn file_store_survives_reopen() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("oauth.json");

    {
        let mut store = FileStore::open(&path)?;
        store.insert(SessionRecord::new(
            "h1".into(),
            Method::ProviderRedirect,
            Some("/docs".into()),
        ))?;
        let mut h2 = record("h2");
        store.insert(h2.clone())?;
        h2.complete("tok-2".into())?;
        store.update(h2)?;
    }

    let store = FileStore::open(&path)?;
    assert_eq!(store.len(), 2);
    let h1 = store.get("h1").ok_or_else(|| anyhow::anyhow!("missing h1"))?;
    assert_eq!(h1.method, Method::ProviderRedirect);
    assert_eq!(h1.context.as_deref(), Some("/docs"));
    assert!(!h1.resolved);
    let h2 = store.get("h2").ok_or_else(|| anyhow::anyhow!("missing h2"))?;
    assert!(h2.resolved);
    assert_eq!(h2.token.as_deref(), Some("tok-2"));
    Ok(())
}

#[test]
fn file_store_remove_is_persisted() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("nested").join("oauth.json");

    let mut store = FileStore::open(&path)?;
    store.insert(record("gone"))?;
    store.insert(record("kept"))?;
    assert_eq!(store.remove(&["gone".to_owned()])?, 1);

    let reopened = FileStore::open(&path)?;
    assert!(reopened.get("gone").is_none());
    assert!(reopened.get("kept").is_some());

    // No tmp files left behind.
    let leftovers: Vec<_> = std::fs::read_dir(dir.path().join("nested"))?
        .filter_map(Result::ok)
        .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
        .collect();
    assert!(leftovers.is_empty());
    Ok(())
}

/// Put a non-empty directory where the store file lives so the rename fails.
fn block_store_file(path: &std::path::Path) -> anyhow::Result<()> {
    std::fs::remove_file(path)?;
    std::fs::create_dir(path)?;
    std::fs::write(path.join("occupied"), b"x")?;
    Ok(())
}

#[test]
fn file_store_failed_remove_keeps_records() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("oauth.json");

    let mut store = FileStore::open(&path)?;
    store.insert(record("a"))?;
    store.insert(record("b"))?;
    block_store_file(&path)?;

    assert!(store.remove(&["a".to_owned(), "b".to_owned()]).is_err());
    assert_eq!(store.len(), 2);
    assert!(store.get("a").is_some());
    assert!(store.get("b").is_some());
    Ok(())
}

#[test]
fn backend_rejects_unsafe_domain() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let backend = StoreBackend::Dir(dir.path().to_path_buf());
    assert!(backend.open("../escape").is_err());
    let store = backend.open("oauth")?;
    assert!(store.is_empty());
    Ok(())
}
