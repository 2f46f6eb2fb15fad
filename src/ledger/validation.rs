//! Local input checks. Everything here runs before any remote call.

use rand::Rng;

use crate::error::{Result, SyncError};
use crate::types::Money;

/// Invite codes avoid characters that are easy to misread (0/O, 1/I).
pub const INVITE_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
pub const INVITE_CODE_LEN: usize = 6;

/// Validate a decimal amount and convert it to cents.
pub fn validate_amount(amount: f64, max_cents: i64) -> Result<Money> {
    if !amount.is_finite() {
        return Err(SyncError::Validation("Amount must be a number".to_string()));
    }
    if amount <= 0.0 {
        return Err(SyncError::Validation(
            "Amount must be greater than zero".to_string(),
        ));
    }
    let cents = (amount * 100.0).round();
    if cents > max_cents as f64 {
        return Err(SyncError::Validation(format!(
            "Amount cannot exceed {}",
            Money(max_cents)
        )));
    }
    if cents < 1.0 {
        return Err(SyncError::Validation(
            "Amount must be at least 0.01".to_string(),
        ));
    }
    Ok(Money(cents as i64))
}

/// Trim a required text field and bound its length in characters.
pub fn validate_required_text(field: &str, value: &str, max_len: usize) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(SyncError::Validation(format!("{} is required", field)));
    }
    check_len(field, trimmed, max_len)?;
    Ok(trimmed.to_string())
}

/// Trim an optional text field; blank becomes `None`.
pub fn validate_optional_text(
    field: &str,
    value: Option<&str>,
    max_len: usize,
) -> Result<Option<String>> {
    match value.map(str::trim) {
        None | Some("") => Ok(None),
        Some(trimmed) => {
            check_len(field, trimmed, max_len)?;
            Ok(Some(trimmed.to_string()))
        }
    }
}

fn check_len(field: &str, value: &str, max_len: usize) -> Result<()> {
    if value.chars().count() > max_len {
        return Err(SyncError::Validation(format!(
            "{} must be at most {} characters",
            field, max_len
        )));
    }
    Ok(())
}

/// Canonical form of a user-entered invite code.
pub fn normalize_invite_code(code: &str) -> Result<String> {
    let normalized = code.trim().to_ascii_uppercase();
    let well_formed = normalized.len() == INVITE_CODE_LEN
        && normalized.bytes().all(|b| INVITE_CODE_ALPHABET.contains(&b));
    if !well_formed {
        return Err(SyncError::Validation("Invalid invite code".to_string()));
    }
    Ok(normalized)
}

pub fn generate_invite_code() -> String {
    let mut rng = rand::rng();
    (0..INVITE_CODE_LEN)
        .map(|_| {
            let index = rng.random_range(0..INVITE_CODE_ALPHABET.len());
            INVITE_CODE_ALPHABET[index] as char
        })
        .collect()
}
