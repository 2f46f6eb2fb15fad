//! Payload decoding for channel snapshots.

use super::types::Payload;
use crate::error::Result;
use crate::store::Document;
use crate::types::{LedgerEntry, Pocket, ResourceKind};

/// Decode a snapshot for a resource of `kind`.
///
/// A transaction log fails as a whole if any entry is malformed.
pub fn decode_payload(kind: ResourceKind, docs: Vec<Document>) -> Result<Payload> {
    match kind {
        ResourceKind::Pocket => match docs.into_iter().next() {
            None => Ok(Payload::Pocket(None)),
            Some(doc) => Ok(Payload::Pocket(Some(Pocket::from_json(doc.id, doc.data)?))),
        },
        ResourceKind::Transactions => {
            let mut entries = docs
                .into_iter()
                .map(|doc| LedgerEntry::from_json(doc.id, doc.data))
                .collect::<Result<Vec<_>>>()?;
            sort_newest_first(&mut entries);
            Ok(Payload::Transactions(entries))
        }
    }
}

/// Order by `date` descending, then `created_at` descending.
pub fn sort_newest_first(entries: &mut [LedgerEntry]) {
    entries.sort_by(|a, b| {
        b.date
            .cmp(&a.date)
            .then_with(|| b.created_at.cmp(&a.created_at))
    });
}
