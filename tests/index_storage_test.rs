//! Integration tests for the index registry.

use std::sync::Arc;
use std::thread;

use tempfile::TempDir;

use divan::document::{Document, Value};
use divan::error::Result;
use divan::index::{IndexDefinition, IndexQuery};
use divan::storage::{IndexStorage, IndexStorageConfig};

fn users_by_name() -> IndexDefinition {
    IndexDefinition::map(|doc: &Document| {
        Ok(vec![Value::object([
            ("Name", doc.get_field("Name").cloned().unwrap_or_default()),
            ("Email", doc.get_field("Email").cloned().unwrap_or_default()),
        ])])
    })
    .store_field("Name")
    .store_field("Email")
}

fn user(id: &str, name: &str, email: &str) -> Document {
    Document::builder(id)
        .field("Name", name)
        .field("Email", email)
        .build()
}

fn open(dir: &TempDir) -> Result<IndexStorage> {
    IndexStorage::open(IndexStorageConfig::new(dir.path()))
}

#[test]
fn test_index_lifecycle() -> Result<()> {
    let dir = TempDir::new()?;
    let storage = open(&dir)?;

    storage.create_index("Users/ByName", users_by_name())?;
    storage.create_index("Users/ByEmail", users_by_name())?;
    assert_eq!(
        storage.list_index_names().into_iter().collect::<Vec<_>>(),
        vec!["Users/ByEmail", "Users/ByName"]
    );

    storage.index(
        "Users/ByName",
        &[
            user("users/1", "ayende", "ayende@ayende.com"),
            user("users/2", "oren", "oren@ayende.com"),
        ],
    )?;

    let result = storage.query(
        "Users/ByName",
        &IndexQuery::new("Name:ayende AND Email:ayende@ayende.com "),
    )?;
    assert_eq!(result.total_results, 1);
    assert_eq!(result.hits[0].document_id.as_deref(), Some("users/1"));

    storage.remove("Users/ByName", &["users/1".to_string()])?;
    let result = storage.query("Users/ByName", &IndexQuery::new(""))?;
    assert_eq!(result.total_results, 1);

    storage.delete_index("Users/ByName")?;
    assert_eq!(
        storage.list_index_names().into_iter().collect::<Vec<_>>(),
        vec!["Users/ByEmail"]
    );
    Ok(())
}

#[test]
fn test_delete_of_missing_index_is_a_noop() -> Result<()> {
    let dir = TempDir::new()?;
    let storage = open(&dir)?;
    storage.create_index("Users/ByName", users_by_name())?;

    storage.delete_index("DoesNotExist")?;
    assert_eq!(storage.list_index_names().len(), 1);
    Ok(())
}

#[test]
fn test_query_of_missing_index_is_not_found() -> Result<()> {
    let dir = TempDir::new()?;
    let storage = open(&dir)?;

    let err = storage
        .query("DoesNotExist", &IndexQuery::new(""))
        .unwrap_err();
    assert!(err.is_not_found());
    Ok(())
}

#[test]
fn test_writes_to_missing_index_are_ignored() -> Result<()> {
    let dir = TempDir::new()?;
    let storage = open(&dir)?;

    let report = storage.index("DoesNotExist", &[user("users/1", "ayende", "a@b.c")])?;
    assert!(report.indexed.is_empty() && report.is_success());
    storage.remove("DoesNotExist", &["users/1".to_string()])?;
    storage.reduce("DoesNotExist", "key")?;
    Ok(())
}

#[test]
fn test_create_existing_index_fails() -> Result<()> {
    let dir = TempDir::new()?;
    let storage = open(&dir)?;
    storage.create_index("Users/ByName", users_by_name())?;

    let err = storage
        .create_index("Users/ByName", users_by_name())
        .unwrap_err();
    assert!(err.is_already_exists());
    Ok(())
}

#[test]
fn test_saved_indexes_reload_after_restart() -> Result<()> {
    let dir = TempDir::new()?;
    {
        let storage = open(&dir)?;
        storage.create_index("Users/ByName", users_by_name())?;
        storage.index("Users/ByName", &[user("users/1", "ayende", "ayende@ayende.com")])?;
        storage.close()?;
    }

    let storage = open(&dir)?;
    assert!(storage.list_index_names().contains("Users/ByName"));

    // Detached indexes answer queries but cannot map.
    let result = storage.query("Users/ByName", &IndexQuery::new("Name:ayende "))?;
    assert_eq!(result.total_results, 1);
    let report = storage.index("Users/ByName", &[user("users/2", "oren", "oren@ayende.com")])?;
    assert_eq!(report.failed_items(), vec!["users/2"]);

    // Binding the definition again restores the write path.
    storage.open_index("Users/ByName", users_by_name())?;
    let report = storage.index("Users/ByName", &[user("users/2", "oren", "oren@ayende.com")])?;
    assert!(report.is_success());
    let result = storage.query("Users/ByName", &IndexQuery::new(""))?;
    assert_eq!(result.total_results, 2);
    Ok(())
}

#[test]
fn test_concurrent_queries_during_structural_changes() -> Result<()> {
    let dir = TempDir::new()?;
    let storage = Arc::new(open(&dir)?);
    storage.create_index("Users/ByName", users_by_name())?;
    storage.index("Users/ByName", &[user("users/1", "ayende", "ayende@ayende.com")])?;

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let storage = Arc::clone(&storage);
            thread::spawn(move || {
                for _ in 0..50 {
                    let result = storage
                        .query("Users/ByName", &IndexQuery::new("Name:ayende "))
                        .unwrap();
                    assert_eq!(result.total_results, 1);
                }
            })
        })
        .collect();

    for i in 0..10 {
        let name = format!("Scratch/{i}");
        storage.create_index(&name, users_by_name())?;
        storage.delete_index(&name)?;
    }

    for reader in readers {
        reader.join().unwrap();
    }
    assert_eq!(storage.list_index_names().len(), 1);
    Ok(())
}
