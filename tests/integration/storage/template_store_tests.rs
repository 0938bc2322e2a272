// tests/integration/storage/template_store_tests.rs
use std::collections::HashSet;
use std::sync::Arc;

use fingerprint_auth::storage::{StorageError, TemplateStore};
use tempfile::tempdir;

async fn setup_test_store() -> (Arc<TemplateStore>, tempfile::TempDir) {
    let temp_dir = tempdir().unwrap();
    let store = TemplateStore::open(temp_dir.path().join("templates")).unwrap();
    (Arc::new(store), temp_dir)
}

#[tokio::test]
async fn test_template_bytes_round_trip_exactly() {
    let (store, _temp_dir) = setup_test_store().await;
    let templates = vec![
        (0..=255u8).collect::<Vec<u8>>(),
        vec![0u8; 2048],
        vec![0xFF; 1],
        (0..1337).map(|i| (i * 7 % 256) as u8).collect(),
    ];

    store.put("alice", &templates, false).await.unwrap();
    let stored = store.get("alice").await.unwrap();

    assert_eq!(stored.len(), templates.len());
    for (expected, actual) in templates.iter().zip(&stored) {
        assert_eq!(&actual.data, expected);
    }
    let sequences: Vec<u32> = stored.iter().map(|t| t.sequence).collect();
    assert_eq!(sequences, vec![0, 1, 2, 3]);
}

#[tokio::test]
async fn test_unknown_names_are_not_found() {
    let (store, _temp_dir) = setup_test_store().await;
    assert!(matches!(store.get("ghost").await, Err(StorageError::NotFound(_))));
    assert!(matches!(store.delete("ghost").await, Err(StorageError::NotFound(_))));
}

#[tokio::test]
async fn test_concurrent_enrollments_get_unique_ids() {
    let (store, _temp_dir) = setup_test_store().await;

    let mut handles = Vec::new();
    for i in 0..10 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            let name = format!("user_{}", i);
            store
                .put(&name, &[vec![i as u8 + 1; 64], vec![i as u8 + 2; 96]], false)
                .await
                .unwrap()
        }));
    }

    let mut ids = HashSet::new();
    for handle in handles {
        ids.insert(handle.await.unwrap().id);
    }
    assert_eq!(ids.len(), 10);
    assert_eq!(store.count_identities().await.unwrap(), 10);

    let all = store.load_all().await.unwrap();
    let template_ids: HashSet<u64> = all
        .iter()
        .flat_map(|e| e.templates.iter().map(|t| t.id))
        .collect();
    assert_eq!(template_ids.len(), 20);
}

#[tokio::test]
async fn test_racing_duplicate_puts_create_one_identity() {
    let (store, _temp_dir) = setup_test_store().await;

    let handles: Vec<_> = (0..5)
        .map(|i| {
            let store = store.clone();
            tokio::spawn(async move { store.put("shared", &[vec![i as u8 + 1; 32]], false).await })
        })
        .collect();

    let mut created = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => created += 1,
            Err(StorageError::DuplicateIdentity(name)) => assert_eq!(name, "shared"),
            Err(e) => panic!("unexpected error: {}", e),
        }
    }
    assert_eq!(created, 1);
    assert_eq!(store.get("shared").await.unwrap().len(), 1);
}
