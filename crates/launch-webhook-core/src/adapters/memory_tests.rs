//! Tests for the in-memory secret store

use super::*;

fn reference(value: &str) -> SecretReference {
    SecretReference::new(value).unwrap()
}

#[tokio::test]
async fn test_get_secret() {
    let store = InMemorySecretStore::new().with_secret("webhook-secret", "s3cr3t");

    let value = store.get_secret(&reference("webhook-secret")).await.unwrap();
    assert_eq!(value.expose_secret(), "s3cr3t");
}

#[tokio::test]
async fn test_missing_secret_is_not_found() {
    let store = InMemorySecretStore::new();

    let err = store.get_secret(&reference("absent")).await.unwrap_err();
    assert!(matches!(err, SecretError::NotFound { ref reference } if reference == "absent"));
    assert_eq!(err.to_string(), "Secret not found: absent");
}

#[tokio::test]
async fn test_clones_share_storage() {
    let store = InMemorySecretStore::new();
    let shared = store.clone();

    store.insert("late", "added-after-clone");
    assert_eq!(shared.len(), 1);
    assert_eq!(
        shared
            .get_secret(&reference("late"))
            .await
            .unwrap()
            .expose_secret(),
        "added-after-clone"
    );

    assert!(shared.remove("late").is_some());
    assert!(store.is_empty());
}

#[tokio::test]
async fn test_collect_from_pairs() {
    let store: InMemorySecretStore = vec![
        ("a".to_string(), SecretValue::from("1")),
        ("b".to_string(), SecretValue::from("2")),
    ]
    .into_iter()
    .collect();

    assert_eq!(store.len(), 2);
    assert_eq!(
        store.get_secret(&reference("b")).await.unwrap().expose_secret(),
        "2"
    );
}
