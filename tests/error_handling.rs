//! Error handling and edge case tests.

use pocket_sync::{
    Collection, EntryKind, MemoryStore, Money, NewEntry, PocketId, RateLimitConfig, RemoteStore,
    Role, StoreCall, SyncConfig, SyncError, SyncService, UserId, WindowLimit,
};
use std::sync::Arc;

fn test_service() -> (SyncService, MemoryStore) {
    let store = MemoryStore::new();
    let service = SyncService::new(Arc::new(store.clone()), SyncConfig::default()).unwrap();
    (service, store)
}

fn entry(pocket: &PocketId, user: &UserId, amount: f64) -> NewEntry {
    NewEntry {
        pocket_id: pocket.clone(),
        user_id: user.clone(),
        kind: EntryKind::Expense,
        category: None,
        description: "coffee".to_string(),
        amount,
        date: None,
    }
}

fn commits(store: &MemoryStore) -> usize {
    store
        .journal()
        .iter()
        .filter(|c| matches!(c, StoreCall::Commit))
        .count()
}

// --- Validation ---

#[tokio::test]
async fn test_invalid_amounts_never_reach_the_store() {
    let (service, store) = test_service();
    let alice = UserId::new("alice");
    let pocket = service
        .create_pocket(&alice, Role::Provider, "Household")
        .await
        .unwrap();

    for bad in [0.0, -5.0, f64::NAN, f64::NEG_INFINITY, 1_000_000.01] {
        let err = service
            .add_transaction(entry(&pocket.id, &alice, bad))
            .await
            .unwrap_err();
        assert!(err.is_validation(), "{} should be rejected locally", bad);
    }

    assert_eq!(commits(&store), 0);
    let p = service.pocket(&pocket.id).await.unwrap().unwrap();
    assert_eq!(p.balance, Money::ZERO);
    assert_eq!(store.count(Collection::Transactions), 0);
}

#[tokio::test]
async fn test_validation_message_is_verbatim() {
    let (service, _store) = test_service();
    let alice = UserId::new("alice");
    let pocket = service
        .create_pocket(&alice, Role::Provider, "Household")
        .await
        .unwrap();

    let err = service
        .add_transaction(NewEntry {
            description: "   ".to_string(),
            ..entry(&pocket.id, &alice, 3.0)
        })
        .await
        .unwrap_err();
    assert_eq!(err.user_message(), "Description is required");

    let err = service
        .join_pocket("not-a-code", &UserId::new("bob"), Role::Spender)
        .await
        .unwrap_err();
    assert_eq!(err.user_message(), "Invalid invite code");
}

// --- Membership ---

#[tokio::test]
async fn test_full_pocket_rejects_join_without_mutation() {
    let (service, store) = test_service();
    let pocket = service
        .create_pocket(&UserId::new("alice"), Role::Provider, "Household")
        .await
        .unwrap();
    service
        .join_pocket(&pocket.invite_code, &UserId::new("bob"), Role::Spender)
        .await
        .unwrap();
    let before = store
        .document(&pocket_sync::DocPath::pocket(pocket.id.as_str()))
        .unwrap();

    let err = service
        .join_pocket(&pocket.invite_code, &UserId::new("carol"), Role::Spender)
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::PocketFull));
    let after = store
        .document(&pocket_sync::DocPath::pocket(pocket.id.as_str()))
        .unwrap();
    assert_eq!(before, after);
}

#[tokio::test]
async fn test_unknown_invite_code() {
    let (service, _store) = test_service();
    let err = service
        .join_pocket("ZZZZZZ", &UserId::new("bob"), Role::Spender)
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::NotFound(_)));
}

#[tokio::test]
async fn test_outsider_cannot_write() {
    let (service, store) = test_service();
    let pocket = service
        .create_pocket(&UserId::new("alice"), Role::Provider, "Household")
        .await
        .unwrap();

    let err = service
        .add_transaction(entry(&pocket.id, &UserId::new("mallory"), 5.0))
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::NotMember));
    assert_eq!(err.user_message(), "You don't have access to this pocket.");
    assert_eq!(store.count(Collection::Transactions), 0);
}

#[tokio::test]
async fn test_missing_pocket() {
    let (service, _store) = test_service();
    let err = service
        .add_transaction(entry(&PocketId::new("ghost"), &UserId::new("alice"), 5.0))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::NotFound(_)));

    let err = service
        .leave_pocket(&PocketId::new("ghost"), &UserId::new("alice"))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::NotFound(_)));
}

// --- Rate Limits ---

#[tokio::test]
async fn test_rate_limit_rejects_burst() {
    let store = MemoryStore::new();
    let config = SyncConfig {
        rate_limits: RateLimitConfig {
            add_transaction: WindowLimit::new(2, 60_000),
            ..Default::default()
        },
        ..Default::default()
    };
    let service = SyncService::new(Arc::new(store.clone()), config).unwrap();
    let alice = UserId::new("alice");
    let pocket = service
        .create_pocket(&alice, Role::Provider, "Household")
        .await
        .unwrap();

    let fund = |amount| NewEntry {
        kind: EntryKind::Fund,
        ..entry(&pocket.id, &alice, amount)
    };
    service.add_transaction(fund(1.0)).await.unwrap();
    service.add_transaction(fund(1.0)).await.unwrap();
    let err = service.add_transaction(fund(1.0)).await.unwrap_err();

    assert!(matches!(err, SyncError::RateLimited { .. }));
    assert_eq!(commits(&store), 2);
}

// --- Store Failures ---

#[tokio::test]
async fn test_offline_store_maps_to_fixed_message() {
    let (service, store) = test_service();
    let alice = UserId::new("alice");
    let pocket = service
        .create_pocket(&alice, Role::Provider, "Household")
        .await
        .unwrap();
    store.disable_transport().await.unwrap();

    let err = service
        .add_transaction(entry(&pocket.id, &alice, 2.0))
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::Unavailable(_)));
    assert_eq!(err.user_message(), "Something went wrong. Please try again.");
}

#[tokio::test]
async fn test_persistent_conflicts_surface_as_conflict() {
    let (service, store) = test_service();
    let alice = UserId::new("alice");
    let pocket = service
        .create_pocket(&alice, Role::Provider, "Household")
        .await
        .unwrap();
    store.inject_commit_conflicts(100);

    let err = service
        .add_transaction(entry(&pocket.id, &alice, 2.0))
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::Conflict(_)));
    assert_eq!(commits(&store), 5);
    let p = service.pocket(&pocket.id).await.unwrap().unwrap();
    assert_eq!(p.total_spent, Money::ZERO);
}

// --- Configuration ---

#[test]
fn test_invalid_config_is_rejected() {
    let err = SyncConfig::from_json_str(r#"{"retry": {"base_delay_ms": 0}}"#).unwrap_err();
    assert!(matches!(err, SyncError::Config(_)));

    let config = SyncConfig {
        ledger: pocket_sync::LedgerConfig {
            delete_batch_size: 501,
            ..Default::default()
        },
        ..Default::default()
    };
    assert!(SyncService::new(Arc::new(MemoryStore::new()), config).is_err());
}
