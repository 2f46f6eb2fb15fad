//! Shared-ledger mutations: transactions, pocket creation, membership.

mod cache;
mod engine;
mod validation;

pub use cache::LookupCache;
pub use engine::{LedgerEngine, MembershipOutcome, NewEntry};
pub(crate) use engine::map_store_failure;
pub use validation::{
    generate_invite_code, normalize_invite_code, validate_amount, validate_optional_text,
    validate_required_text, INVITE_CODE_ALPHABET, INVITE_CODE_LEN,
};
