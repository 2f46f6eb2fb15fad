//! Integration tests for ledger workflows and live views.

use async_trait::async_trait;
use parking_lot::Mutex;
use pocket_sync::{
    BatchWrite, Channel, ChannelId, ChannelTarget, Collection, DocPath, Document, EntryKind,
    LedgerConfig, LedgerEntry, MembershipOutcome, MemoryStore, Money, NewEntry, Pocket, PocketId,
    RateLimitConfig, RemoteStore, Role, StoreResult, StoreTransaction, SyncConfig, SyncService,
    Timestamp, UserId, WindowLimit,
};
use proptest::prelude::*;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;

fn test_service() -> (SyncService, MemoryStore) {
    let store = MemoryStore::new();
    let service = SyncService::new(Arc::new(store.clone()), SyncConfig::default()).unwrap();
    (service, store)
}

fn entry(pocket: &PocketId, user: &UserId, kind: EntryKind, amount: f64) -> NewEntry {
    NewEntry {
        pocket_id: pocket.clone(),
        user_id: user.clone(),
        kind,
        category: None,
        description: "entry".to_string(),
        amount,
        date: None,
    }
}

async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    tokio::time::sleep(Duration::from_millis(10)).await;
}

/// Yields after every read so concurrent callers interleave between
/// their read and their write.
struct YieldingStore {
    inner: MemoryStore,
}

struct YieldingTransaction {
    inner: Box<dyn StoreTransaction>,
}

#[async_trait]
impl StoreTransaction for YieldingTransaction {
    async fn get(&mut self, path: &DocPath) -> StoreResult<Option<Document>> {
        let doc = self.inner.get(path).await;
        tokio::task::yield_now().await;
        doc
    }

    fn allocate_id(&mut self, collection: Collection) -> String {
        self.inner.allocate_id(collection)
    }

    fn set(&mut self, path: DocPath, data: Value) {
        self.inner.set(path, data)
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.inner.commit().await
    }
}

#[async_trait]
impl RemoteStore for YieldingStore {
    async fn get(&self, path: &DocPath) -> StoreResult<Option<Document>> {
        let doc = self.inner.get(path).await;
        tokio::task::yield_now().await;
        doc
    }

    async fn query(
        &self,
        collection: Collection,
        field: &str,
        value: &Value,
    ) -> StoreResult<Vec<Document>> {
        self.inner.query(collection, field, value).await
    }

    async fn create(&self, collection: Collection, data: Value) -> StoreResult<String> {
        self.inner.create(collection, data).await
    }

    async fn update(&self, path: &DocPath, fields: Map<String, Value>) -> StoreResult<()> {
        self.inner.update(path, fields).await
    }

    async fn commit_batch(&self, writes: Vec<BatchWrite>) -> StoreResult<()> {
        self.inner.commit_batch(writes).await
    }

    async fn begin_transaction(&self) -> StoreResult<Box<dyn StoreTransaction>> {
        let inner = self.inner.begin_transaction().await?;
        Ok(Box::new(YieldingTransaction { inner }))
    }

    fn subscribe(&self, target: &ChannelTarget) -> StoreResult<Channel> {
        self.inner.subscribe(target)
    }

    fn close_channel(&self, id: ChannelId) {
        self.inner.close_channel(id)
    }

    async fn disable_transport(&self) -> StoreResult<()> {
        self.inner.disable_transport().await
    }

    async fn enable_transport(&self) -> StoreResult<()> {
        self.inner.enable_transport().await
    }

    async fn clear_local_cache(&self) -> StoreResult<()> {
        self.inner.clear_local_cache().await
    }

    async fn terminate_channel(&self) -> StoreResult<()> {
        self.inner.terminate_channel().await
    }
}

// --- Ledger Workflows ---

#[tokio::test]
async fn test_seed_then_groceries() {
    let (service, _store) = test_service();
    let alice = UserId::new("alice");
    let pocket = service
        .create_pocket(&alice, Role::Provider, "Household")
        .await
        .unwrap();

    let seed = NewEntry {
        description: "seed".to_string(),
        ..entry(&pocket.id, &alice, EntryKind::Fund, 100.00)
    };
    service.add_transaction(seed).await.unwrap();

    let p = service.pocket(&pocket.id).await.unwrap().unwrap();
    assert_eq!(p.balance, Money(10_000));
    assert_eq!(p.total_funded, Money(10_000));

    let milk = NewEntry {
        category: Some("Groceries".to_string()),
        description: "milk".to_string(),
        ..entry(&pocket.id, &alice, EntryKind::Expense, 12.50)
    };
    let created = service.add_transaction(milk).await.unwrap();
    assert_eq!(created.category.as_deref(), Some("Groceries"));

    let p = service.pocket(&pocket.id).await.unwrap().unwrap();
    assert_eq!(p.balance.to_string(), "87.50");
    assert_eq!(p.total_spent, Money(1_250));
    assert!(p.is_balanced());
}

#[tokio::test]
async fn test_two_participants_share_one_balance() {
    let (service, store) = test_service();
    let alice = UserId::new("alice");
    let bob = UserId::new("bob");
    let pocket = service
        .create_pocket(&alice, Role::Provider, "Allowance")
        .await
        .unwrap();
    service
        .join_pocket(&pocket.invite_code, &bob, Role::Spender)
        .await
        .unwrap();

    service
        .add_transaction(entry(&pocket.id, &alice, EntryKind::Fund, 50.0))
        .await
        .unwrap();
    service
        .add_transaction(entry(&pocket.id, &bob, EntryKind::Expense, 7.25))
        .await
        .unwrap();

    let p = service.pocket(&pocket.id).await.unwrap().unwrap();
    assert_eq!(p.participants, vec![alice, bob]);
    assert_eq!(p.balance, Money(4_275));
    assert_eq!(store.count(Collection::Transactions), 2);
    assert!(service.subscription_stats().last_successful_operation.is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_writers_preserve_balance() {
    let store = MemoryStore::new();
    let config = SyncConfig {
        ledger: LedgerConfig {
            max_commit_attempts: 100,
            ..Default::default()
        },
        rate_limits: RateLimitConfig {
            add_transaction: WindowLimit::new(1_000, 60_000),
            ..Default::default()
        },
        ..Default::default()
    };
    let service = Arc::new(SyncService::new(Arc::new(store.clone()), config).unwrap());
    let alice = UserId::new("alice");
    let bob = UserId::new("bob");
    let pocket = service
        .create_pocket(&alice, Role::Provider, "Shared")
        .await
        .unwrap();
    service
        .join_pocket(&pocket.invite_code, &bob, Role::Spender)
        .await
        .unwrap();

    let mut tasks = Vec::new();
    for i in 0..20 {
        let service = Arc::clone(&service);
        let pocket_id = pocket.id.clone();
        let (user, kind) = if i % 2 == 0 {
            (alice.clone(), EntryKind::Fund)
        } else {
            (bob.clone(), EntryKind::Expense)
        };
        tasks.push(tokio::spawn(async move {
            service
                .add_transaction(entry(&pocket_id, &user, kind, 1.5))
                .await
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let p = service.pocket(&pocket.id).await.unwrap().unwrap();
    assert_eq!(p.total_funded, Money(1_500));
    assert_eq!(p.total_spent, Money(1_500));
    assert_eq!(p.balance, Money::ZERO);
    assert!(p.is_balanced());
    assert_eq!(store.count(Collection::Transactions), 20);
}

#[tokio::test]
async fn test_concurrent_leaves_close_pocket() {
    let store = MemoryStore::new();
    let yielding = YieldingStore {
        inner: store.clone(),
    };
    let service = SyncService::new(Arc::new(yielding), SyncConfig::default()).unwrap();
    let alice = UserId::new("alice");
    let bob = UserId::new("bob");
    let pocket = service
        .create_pocket(&alice, Role::Provider, "Shared")
        .await
        .unwrap();
    service
        .join_pocket(&pocket.invite_code, &bob, Role::Spender)
        .await
        .unwrap();
    service
        .add_transaction(entry(&pocket.id, &alice, EntryKind::Fund, 10.0))
        .await
        .unwrap();

    let (first, second) = tokio::join!(
        service.leave_pocket(&pocket.id, &alice),
        service.leave_pocket(&pocket.id, &bob),
    );
    let mut outcomes = vec![first.unwrap(), second.unwrap()];
    outcomes.sort_by_key(|o| matches!(o, MembershipOutcome::Closed { .. }));
    assert_eq!(
        outcomes,
        vec![MembershipOutcome::Left, MembershipOutcome::Closed { purged: 1 }]
    );

    let p = service.pocket(&pocket.id).await.unwrap().unwrap();
    assert!(p.participants.is_empty());
    assert!(p.deleted);
    assert!(p.deleted_at.is_some());
    assert_eq!(store.count(Collection::Transactions), 0);
}

// --- Live Views ---

#[tokio::test(start_paused = true)]
async fn test_transaction_view_is_newest_first() {
    let (service, _store) = test_service();
    let alice = UserId::new("alice");
    let pocket = service
        .create_pocket(&alice, Role::Provider, "Household")
        .await
        .unwrap();

    let seen: Arc<Mutex<Vec<Vec<LedgerEntry>>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let handle = service.subscribe_to_transactions(pocket.id.clone(), move |entries| {
        sink.lock().push(entries);
    });
    settle().await;
    assert_eq!(seen.lock().len(), 1);
    assert!(seen.lock()[0].is_empty());

    for (description, day) in [("older", 1_i64), ("newer", 3), ("middle", 2)] {
        let e = NewEntry {
            description: description.to_string(),
            date: Some(Timestamp(day * 86_400_000_000)),
            ..entry(&pocket.id, &alice, EntryKind::Fund, 1.0)
        };
        service.add_transaction(e).await.unwrap();
    }
    settle().await;

    let latest = seen.lock().last().cloned().unwrap();
    let order: Vec<_> = latest.iter().map(|e| e.description.as_str()).collect();
    assert_eq!(order, vec!["newer", "middle", "older"]);

    assert!(handle.cancel());
}

#[tokio::test(start_paused = true)]
async fn test_pocket_view_follows_balance() {
    let (service, _store) = test_service();
    let alice = UserId::new("alice");
    let pocket = service
        .create_pocket(&alice, Role::Provider, "Household")
        .await
        .unwrap();

    let seen: Arc<Mutex<Vec<Option<Pocket>>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let _handle = service.subscribe_to_pocket(pocket.id.clone(), move |p| {
        sink.lock().push(p);
    });
    settle().await;

    service
        .add_transaction(entry(&pocket.id, &alice, EntryKind::Fund, 20.0))
        .await
        .unwrap();
    settle().await;

    let views = seen.lock();
    assert_eq!(views.len(), 2);
    assert_eq!(views[0].as_ref().unwrap().balance, Money::ZERO);
    let latest = views[1].as_ref().unwrap();
    assert_eq!(latest.id, pocket.id);
    assert_eq!(latest.balance, Money(2_000));
}

#[tokio::test(start_paused = true)]
async fn test_missing_pocket_view_is_none() {
    let (service, _store) = test_service();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);

    service.subscribe_to_pocket(PocketId::new("nope"), move |p| {
        sink.lock().push(p.is_none());
    });
    settle().await;

    assert_eq!(*seen.lock(), vec![true]);
}

// --- Properties ---

fn run_ledger(ops: &[(bool, i64)]) -> Pocket {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    runtime.block_on(async {
        let (service, _store) = test_service();
        let alice = UserId::new("alice");
        let pocket = service
            .create_pocket(&alice, Role::Provider, "Prop")
            .await
            .unwrap();
        for &(fund, cents) in ops {
            let kind = if fund { EntryKind::Fund } else { EntryKind::Expense };
            service
                .add_transaction(entry(&pocket.id, &alice, kind, cents as f64 / 100.0))
                .await
                .unwrap();
        }
        service.pocket(&pocket.id).await.unwrap().unwrap()
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_balance_equals_funded_minus_spent(
        ops in prop::collection::vec((any::<bool>(), 1i64..=100_000_000i64), 1..12)
    ) {
        let pocket = run_ledger(&ops);

        let funded: i64 = ops.iter().filter(|(f, _)| *f).map(|(_, c)| c).sum();
        let spent: i64 = ops.iter().filter(|(f, _)| !*f).map(|(_, c)| c).sum();
        prop_assert_eq!(pocket.total_funded, Money(funded));
        prop_assert_eq!(pocket.total_spent, Money(spent));
        prop_assert_eq!(pocket.balance, Money(funded - spent));
        prop_assert!(pocket.is_balanced());
    }
}
