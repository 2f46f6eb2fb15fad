//! Ledger mutation engine.
//!
//! Every balance change goes through one store transaction that reads the
//! pocket, appends the entry and rewrites the totals together. A commit that
//! loses a race is retried from the read, a bounded number of times.

use serde_json::{Map, Value};
use std::sync::Arc;

use super::cache::LookupCache;
use super::validation::{
    generate_invite_code, normalize_invite_code, validate_amount, validate_optional_text,
    validate_required_text,
};
use crate::classify::{classify, FailureKind};
use crate::config::{LedgerConfig, RateLimitConfig};
use crate::error::{FailureCode, Result, StoreFailure, SyncError};
use crate::rate_limit::{RateAction, RateLimiter};
use crate::store::{BatchWrite, Collection, DocPath, RemoteStore};
use crate::types::{
    EntryId, EntryKind, LedgerEntry, Pocket, PocketId, Role, Timestamp, UserId,
};

const INVITE_CODE_ATTEMPTS: u32 = 5;

/// Input for [`LedgerEngine::add_transaction`].
#[derive(Clone, Debug)]
pub struct NewEntry {
    pub pocket_id: PocketId,
    pub user_id: UserId,
    pub kind: EntryKind,
    pub category: Option<String>,
    pub description: String,
    /// Decimal amount as entered; validated and rounded to cents.
    pub amount: f64,
    /// Defaults to now.
    pub date: Option<Timestamp>,
}

/// Result of a leave or delete request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MembershipOutcome {
    /// The caller left; other participants remain.
    Left,
    /// The pocket is flagged deleted; other participants still see it.
    SoftDeleted,
    /// No participants remain; the transaction log was purged.
    Closed { purged: usize },
    /// The caller was not a participant. Nothing changed.
    NotMember,
}

pub struct LedgerEngine {
    store: Arc<dyn RemoteStore>,
    limiter: RateLimiter,
    cache: Arc<LookupCache>,
    config: LedgerConfig,
}

impl LedgerEngine {
    pub fn new(
        store: Arc<dyn RemoteStore>,
        cache: Arc<LookupCache>,
        config: LedgerConfig,
        rate_limits: RateLimitConfig,
    ) -> Self {
        Self {
            store,
            limiter: RateLimiter::new(rate_limits),
            cache,
            config,
        }
    }

    /// Append an entry and apply it to the pocket's balance atomically.
    #[tracing::instrument(
        skip_all,
        fields(pocket_id = %entry.pocket_id, user = %entry.user_id, kind = %entry.kind)
    )]
    pub async fn add_transaction(&self, entry: NewEntry) -> Result<LedgerEntry> {
        self.limiter.check(RateAction::AddTransaction, &entry.user_id)?;
        let amount = validate_amount(entry.amount, self.config.max_amount_cents)?;
        let description = validate_required_text(
            "Description",
            &entry.description,
            self.config.max_description_len,
        )?;
        let category = validate_optional_text(
            "Category",
            entry.category.as_deref(),
            self.config.max_category_len,
        )?;

        let created_at = Timestamp::now();
        let draft = LedgerEntry {
            id: EntryId::default(),
            pocket_id: entry.pocket_id.clone(),
            user_id: entry.user_id.clone(),
            kind: entry.kind,
            category,
            description,
            amount,
            date: entry.date.unwrap_or(created_at),
            created_at,
        };

        let mut attempt = 1;
        loop {
            match self.try_add(&draft).await {
                Ok(created) => {
                    tracing::debug!(entry_id = %created.id, amount = %amount, "transaction added");
                    return Ok(created);
                }
                Err(SyncError::Conflict(reason)) if attempt < self.config.max_commit_attempts => {
                    tracing::debug!(attempt, reason = %reason, "commit conflict, retrying");
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn try_add(&self, draft: &LedgerEntry) -> Result<LedgerEntry> {
        let op = "add_transaction";
        let pocket_path = DocPath::pocket(draft.pocket_id.as_str());

        let mut tx = self
            .store
            .begin_transaction()
            .await
            .map_err(|f| map_store_failure(op, f))?;
        let doc = tx
            .get(&pocket_path)
            .await
            .map_err(|f| map_store_failure(op, f))?
            .ok_or_else(|| SyncError::NotFound(format!("pocket {}", draft.pocket_id)))?;

        let mut pocket = Pocket::from_json(doc.id, doc.data)?;
        if pocket.deleted {
            return Err(SyncError::PocketDeleted);
        }
        if !pocket.is_participant(&draft.user_id) {
            return Err(SyncError::NotMember);
        }
        pocket.apply_entry(draft.kind, draft.amount)?;

        let mut created = draft.clone();
        created.id = EntryId(tx.allocate_id(Collection::Transactions));
        tx.set(DocPath::entry(&created.id.0), created.to_json()?);
        tx.set(pocket_path, pocket.to_json()?);
        tx.commit().await.map_err(|f| map_store_failure(op, f))?;

        Ok(created)
    }

    /// Create a pocket with `user` as its sole participant.
    #[tracing::instrument(skip_all, fields(user = %user, role = ?role))]
    pub async fn create_pocket(&self, user: &UserId, role: Role, name: &str) -> Result<Pocket> {
        let op = "create_pocket";
        self.limiter.check(RateAction::CreatePocket, user)?;
        let name = validate_required_text("Name", name, self.config.max_name_len)?;

        let invite_code = self.unused_invite_code().await?;
        let mut pocket = Pocket::new(PocketId::default(), name, user.clone(), role, invite_code);
        let id = self
            .store
            .create(Collection::Pockets, pocket.to_json()?)
            .await
            .map_err(|f| map_store_failure(op, f))?;
        pocket.id = PocketId(id);

        self.cache.insert(pocket.invite_code.clone(), pocket.id.clone());
        tracing::info!(pocket_id = %pocket.id, "pocket created");
        Ok(pocket)
    }

    async fn unused_invite_code(&self) -> Result<String> {
        for _ in 0..INVITE_CODE_ATTEMPTS {
            let code = generate_invite_code();
            let taken = self
                .store
                .query(Collection::Pockets, "inviteCode", &Value::String(code.clone()))
                .await
                .map_err(|f| map_store_failure("create_pocket", f))?;
            if taken.is_empty() {
                return Ok(code);
            }
        }
        tracing::error!("could not find a free invite code");
        Err(SyncError::Unavailable("invite code space exhausted".to_string()))
    }

    /// Join the pocket that `invite_code` refers to.
    #[tracing::instrument(skip_all, fields(user = %user, role = ?role))]
    pub async fn join_pocket(&self, invite_code: &str, user: &UserId, role: Role) -> Result<Pocket> {
        self.limiter.check(RateAction::JoinPocket, user)?;
        let code = normalize_invite_code(invite_code)?;

        let mut pocket = self
            .find_by_invite(&code)
            .await?
            .ok_or_else(|| SyncError::NotFound("invite code".to_string()))?;

        if pocket.is_participant(user) {
            return Err(SyncError::AlreadyMember);
        }
        if pocket.is_full() {
            return Err(SyncError::PocketFull);
        }

        pocket.participants.push(user.clone());
        pocket.roles.insert(user.clone(), role);
        pocket.updated_at = Timestamp::now();
        self.write_membership(&pocket, "join_pocket").await?;

        tracing::info!(pocket_id = %pocket.id, "joined pocket");
        Ok(pocket)
    }

    async fn find_by_invite(&self, code: &str) -> Result<Option<Pocket>> {
        let op = "join_pocket";

        if let Some(id) = self.cache.get(code) {
            if let Some(pocket) = self.pocket(&id).await? {
                if pocket.invite_code == code && !pocket.deleted {
                    return Ok(Some(pocket));
                }
            }
            self.cache.invalidate(code);
        }

        let docs = self
            .store
            .query(Collection::Pockets, "inviteCode", &Value::String(code.to_string()))
            .await
            .map_err(|f| map_store_failure(op, f))?;

        for doc in docs {
            let pocket = Pocket::from_json(doc.id, doc.data)?;
            if !pocket.deleted {
                self.cache.insert(code, pocket.id.clone());
                return Ok(Some(pocket));
            }
        }
        Ok(None)
    }

    /// Leave a pocket. The last participant out closes it.
    #[tracing::instrument(skip_all, fields(pocket_id = %pocket_id, user = %user))]
    pub async fn leave_pocket(&self, pocket_id: &PocketId, user: &UserId) -> Result<MembershipOutcome> {
        let pocket = match self.remove_member(pocket_id, user, false, "leave_pocket").await? {
            Some(pocket) => pocket,
            None => return Ok(MembershipOutcome::NotMember),
        };

        if pocket.participants.is_empty() {
            self.cache.invalidate(&pocket.invite_code);
            let purged = self.purge_transactions(pocket_id).await?;
            tracing::info!(purged, "last participant left, pocket closed");
            return Ok(MembershipOutcome::Closed { purged });
        }
        tracing::info!("left pocket");
        Ok(MembershipOutcome::Left)
    }

    /// Soft-delete a pocket and remove the caller from it.
    #[tracing::instrument(skip_all, fields(pocket_id = %pocket_id, user = %user))]
    pub async fn delete_pocket(&self, pocket_id: &PocketId, user: &UserId) -> Result<MembershipOutcome> {
        let pocket = match self.remove_member(pocket_id, user, true, "delete_pocket").await? {
            Some(pocket) => pocket,
            None => return Ok(MembershipOutcome::NotMember),
        };
        self.cache.invalidate(&pocket.invite_code);

        if pocket.participants.is_empty() {
            let purged = self.purge_transactions(pocket_id).await?;
            tracing::info!(purged, "pocket deleted and log purged");
            return Ok(MembershipOutcome::Closed { purged });
        }
        tracing::info!("pocket soft-deleted");
        Ok(MembershipOutcome::SoftDeleted)
    }

    /// Remove `user` in one transaction, retried on conflict. Returns the
    /// committed pocket, or `None` when `user` was not a participant.
    async fn remove_member(
        &self,
        pocket_id: &PocketId,
        user: &UserId,
        delete: bool,
        op: &str,
    ) -> Result<Option<Pocket>> {
        let mut attempt = 1;
        loop {
            match self.try_remove_member(pocket_id, user, delete, op).await {
                Err(SyncError::Conflict(reason)) if attempt < self.config.max_commit_attempts => {
                    tracing::debug!(attempt, reason = %reason, "membership commit conflict, retrying");
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    async fn try_remove_member(
        &self,
        pocket_id: &PocketId,
        user: &UserId,
        delete: bool,
        op: &str,
    ) -> Result<Option<Pocket>> {
        let path = DocPath::pocket(pocket_id.as_str());
        let mut tx = self
            .store
            .begin_transaction()
            .await
            .map_err(|f| map_store_failure(op, f))?;
        let doc = tx
            .get(&path)
            .await
            .map_err(|f| map_store_failure(op, f))?
            .ok_or_else(|| SyncError::NotFound(format!("pocket {}", pocket_id)))?;

        let mut pocket = Pocket::from_json(doc.id, doc.data)?;
        if !pocket.remove_participant(user) {
            return Ok(None);
        }
        pocket.updated_at = Timestamp::now();
        // An empty pocket is always closed, whichever call emptied it.
        if (delete || pocket.participants.is_empty()) && !pocket.deleted {
            pocket.deleted = true;
            pocket.deleted_at = Some(pocket.updated_at);
        }

        tx.set(path, pocket.to_json()?);
        tx.commit().await.map_err(|f| map_store_failure(op, f))?;
        Ok(Some(pocket))
    }

    /// Read a pocket by id.
    pub async fn pocket(&self, id: &PocketId) -> Result<Option<Pocket>> {
        let doc = self
            .store
            .get(&DocPath::pocket(id.as_str()))
            .await
            .map_err(|f| map_store_failure("get_pocket", f))?;
        doc.map(|d| Pocket::from_json(d.id, d.data)).transpose()
    }

    async fn write_membership(&self, pocket: &Pocket, op: &str) -> Result<()> {
        let mut fields = Map::new();
        fields.insert("participants".into(), serde_json::to_value(&pocket.participants)?);
        fields.insert("roles".into(), serde_json::to_value(&pocket.roles)?);
        fields.insert("updatedAt".into(), serde_json::to_value(pocket.updated_at)?);
        self.store
            .update(&DocPath::pocket(pocket.id.as_str()), fields)
            .await
            .map_err(|f| map_store_failure(op, f))
    }

    /// Delete a pocket's transaction log in sequential bounded batches.
    async fn purge_transactions(&self, pocket_id: &PocketId) -> Result<usize> {
        let op = "purge_transactions";
        let docs = self
            .store
            .query(
                Collection::Transactions,
                "pocketId",
                &Value::String(pocket_id.as_str().to_string()),
            )
            .await
            .map_err(|f| map_store_failure(op, f))?;

        let mut purged = 0;
        for chunk in docs.chunks(self.config.delete_batch_size.max(1)) {
            let writes = chunk
                .iter()
                .map(|doc| BatchWrite::Delete(DocPath::entry(&doc.id)))
                .collect::<Vec<_>>();
            self.store
                .commit_batch(writes)
                .await
                .map_err(|f| map_store_failure(op, f))?;
            purged += chunk.len();
            tracing::debug!(purged, total = docs.len(), "purged transaction batch");
        }
        Ok(purged)
    }
}

/// Map a raw store failure to a caller-facing error, logging the original.
pub(crate) fn map_store_failure(op: &str, failure: StoreFailure) -> SyncError {
    if failure.is_conflict() {
        tracing::warn!(op, error = %failure, "store commit conflict");
        return SyncError::Conflict(op.to_string());
    }
    tracing::error!(op, error = %failure, "store call failed");
    if failure.code == FailureCode::NotFound {
        return SyncError::NotFound(op.to_string());
    }
    match classify(&failure) {
        FailureKind::Permission if failure.code == FailureCode::Unavailable => {
            SyncError::Unavailable(op.to_string())
        }
        FailureKind::Permission => SyncError::PermissionDenied(op.to_string()),
        FailureKind::Validation => SyncError::Validation("Invalid request".to_string()),
        FailureKind::InternalCorruption | FailureKind::Transient => {
            SyncError::Unavailable(op.to_string())
        }
    }
}
