//! Core types for pockets, ledger entries, and subscribable resources.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{Result, SyncError};

/// Maximum number of participants sharing one pocket.
pub const MAX_PARTICIPANTS: usize = 2;

/// Identifier of a pocket document.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PocketId(pub String);

impl PocketId {
    pub fn new(id: impl Into<String>) -> Self {
        PocketId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for PocketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PocketId({})", self.0)
    }
}

impl fmt::Display for PocketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of an authenticated user, as issued by the session layer.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        UserId(id.into())
    }
}

impl fmt::Debug for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UserId({})", self.0)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a ledger entry (server-assigned).
#[derive(Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(pub String);

impl fmt::Debug for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntryId({})", self.0)
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Microseconds since Unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Current wall-clock time.
    pub fn now() -> Self {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Timestamp(duration.as_micros() as i64)
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

/// A monetary amount in integer cents.
///
/// Ledger arithmetic never touches floating point: amounts are validated and
/// rounded once at the boundary, then carried as cents.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(pub i64);

impl Money {
    pub const ZERO: Money = Money(0);

    pub fn checked_add(self, other: Money) -> Option<Money> {
        self.0.checked_add(other.0).map(Money)
    }

    pub fn checked_sub(self, other: Money) -> Option<Money> {
        self.0.checked_sub(other.0).map(Money)
    }
}

impl fmt::Debug for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Money({})", self)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{}{}.{:02}", sign, abs / 100, abs % 100)
    }
}

/// A participant's role in a pocket.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Provider,
    Spender,
}

impl std::str::FromStr for Role {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "provider" => Ok(Role::Provider),
            "spender" => Ok(Role::Spender),
            other => Err(SyncError::Validation(format!("Invalid role: {}", other))),
        }
    }
}

/// Ledger entry type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Fund,
    Expense,
}

impl std::str::FromStr for EntryKind {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fund" => Ok(EntryKind::Fund),
            "expense" => Ok(EntryKind::Expense),
            other => Err(SyncError::Validation(format!(
                "Invalid transaction type: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryKind::Fund => write!(f, "fund"),
            EntryKind::Expense => write!(f, "expense"),
        }
    }
}

/// The shared ledger aggregate.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pocket {
    /// Document id; carried outside the document body.
    #[serde(skip)]
    pub id: PocketId,
    pub name: String,
    pub participants: Vec<UserId>,
    pub roles: BTreeMap<UserId, Role>,
    pub balance: Money,
    pub total_funded: Money,
    pub total_spent: Money,
    pub invite_code: String,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub deleted_at: Option<Timestamp>,
    pub created_by: UserId,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Pocket {
    /// A fresh pocket with `creator` as its only participant.
    pub fn new(
        id: PocketId,
        name: impl Into<String>,
        creator: UserId,
        role: Role,
        invite_code: impl Into<String>,
    ) -> Self {
        let now = Timestamp::now();
        let mut roles = BTreeMap::new();
        roles.insert(creator.clone(), role);
        Self {
            id,
            name: name.into(),
            participants: vec![creator.clone()],
            roles,
            balance: Money::ZERO,
            total_funded: Money::ZERO,
            total_spent: Money::ZERO,
            invite_code: invite_code.into(),
            deleted: false,
            deleted_at: None,
            created_by: creator,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_participant(&self, user: &UserId) -> bool {
        self.participants.contains(user)
    }

    pub fn is_full(&self) -> bool {
        self.participants.len() >= MAX_PARTICIPANTS
    }

    /// Whether `balance == total_funded - total_spent`.
    pub fn is_balanced(&self) -> bool {
        self.total_funded
            .checked_sub(self.total_spent)
            .map(|net| net == self.balance)
            .unwrap_or(false)
    }

    /// Apply one entry to the running totals.
    ///
    /// The pocket is left untouched when any of the sums would overflow.
    pub fn apply_entry(&mut self, kind: EntryKind, amount: Money) -> Result<()> {
        let overflow = || SyncError::Validation("Amount exceeds ledger capacity".to_string());
        match kind {
            EntryKind::Fund => {
                let total = self.total_funded.checked_add(amount).ok_or_else(overflow)?;
                let balance = self.balance.checked_add(amount).ok_or_else(overflow)?;
                self.total_funded = total;
                self.balance = balance;
            }
            EntryKind::Expense => {
                let total = self.total_spent.checked_add(amount).ok_or_else(overflow)?;
                let balance = self.balance.checked_sub(amount).ok_or_else(overflow)?;
                self.total_spent = total;
                self.balance = balance;
            }
        }
        self.updated_at = Timestamp::now();
        Ok(())
    }

    /// Remove a participant and their role. Returns false if absent.
    pub fn remove_participant(&mut self, user: &UserId) -> bool {
        let before = self.participants.len();
        self.participants.retain(|p| p != user);
        self.roles.remove(user);
        before != self.participants.len()
    }
}

/// An immutable ledger entry in a pocket's transaction log.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    #[serde(skip)]
    pub id: EntryId,
    pub pocket_id: PocketId,
    pub user_id: UserId,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    #[serde(default)]
    pub category: Option<String>,
    pub description: String,
    pub amount: Money,
    pub date: Timestamp,
    pub created_at: Timestamp,
}

impl Pocket {
    /// Decode a stored pocket document.
    pub fn from_json(id: impl Into<String>, data: serde_json::Value) -> Result<Self> {
        let mut pocket: Pocket = serde_json::from_value(data)?;
        pocket.id = PocketId(id.into());
        Ok(pocket)
    }

    pub fn to_json(&self) -> Result<serde_json::Value> {
        serde_json::to_value(self).map_err(|e| SyncError::Serialization(e.to_string()))
    }
}

impl LedgerEntry {
    /// Decode a stored transaction document.
    pub fn from_json(id: impl Into<String>, data: serde_json::Value) -> Result<Self> {
        let mut entry: LedgerEntry = serde_json::from_value(data)?;
        entry.id = EntryId(id.into());
        Ok(entry)
    }

    pub fn to_json(&self) -> Result<serde_json::Value> {
        serde_json::to_value(self).map_err(|e| SyncError::Serialization(e.to_string()))
    }
}

/// Kind of subscribable remote state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// The pocket aggregate document.
    Pocket,
    /// The pocket's transaction log.
    Transactions,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::Pocket => write!(f, "pocket"),
            ResourceKind::Transactions => write!(f, "transactions"),
        }
    }
}

/// Registry key: at most one live subscription exists per key.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ResourceKey {
    pub kind: ResourceKind,
    pub id: PocketId,
}

impl ResourceKey {
    pub fn pocket(id: PocketId) -> Self {
        Self {
            kind: ResourceKind::Pocket,
            id,
        }
    }

    pub fn transactions(id: PocketId) -> Self {
        Self {
            kind: ResourceKind::Transactions,
            id,
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}
