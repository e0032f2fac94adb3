//! Full query text side table client.
//!
//! Query texts longer than the truncation threshold are stored once in the
//! side table, keyed by the sha1 of the full text, and query rows carry only
//! a truncated prefix plus that sha1. Reuse of a sha1 refreshes its expiry.
//! Texts live as long as the longest-retained query row that may reference
//! them, so a non-empty sha1 on a query row always resolves.

use std::sync::Arc;

use sha1::{Digest, Sha1};

use central_storage::Storage;
use central_types::SharedQueryText;

use crate::error::AggregateError;

/// A shared query text after side-table resolution: what the query row
/// stores. An empty sha1 means the truncated text is the entire text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedQueryText {
    pub truncated_text: String,
    pub full_text_sha1: String,
}

/// Client for the full query text side table.
pub struct QueryTextClient {
    storage: Arc<Storage>,
    truncate_len: usize,
    /// Longest data retention across rollup levels, in seconds
    text_ttl_seconds: i64,
}

impl QueryTextClient {
    pub fn new(storage: Arc<Storage>, truncate_len: usize, text_ttl_seconds: i64) -> Self {
        Self {
            storage,
            truncate_len,
            text_ttl_seconds,
        }
    }

    /// Resolve a batch of shared query texts, writing or refreshing side
    /// table rows as needed. Completes every side-table write before
    /// returning, which is what keeps aggregate rows from referencing a
    /// sha1 that was never stored.
    pub fn resolve(
        &self,
        texts: &[SharedQueryText],
        now_millis: i64,
    ) -> Result<Vec<ResolvedQueryText>, AggregateError> {
        let mut resolved = Vec::with_capacity(texts.len());
        for text in texts {
            resolved.push(self.resolve_one(text, now_millis)?);
        }
        Ok(resolved)
    }

    fn resolve_one(
        &self,
        text: &SharedQueryText,
        now_millis: i64,
    ) -> Result<ResolvedQueryText, AggregateError> {
        if let Some(sha1) = &text.full_text_sha1 {
            // Already truncated by the agent; refresh the side table expiry
            // when the text is still present.
            if let Some(full_text) = self.storage.get_query_text(sha1, now_millis)? {
                self.storage
                    .put_query_text(sha1, &full_text, self.text_ttl_seconds, now_millis)?;
            }
            let truncated = text
                .truncated_text
                .clone()
                .unwrap_or_else(|| truncate(&text.full_text, self.truncate_len));
            return Ok(ResolvedQueryText {
                truncated_text: truncated,
                full_text_sha1: sha1.clone(),
            });
        }

        if text.full_text.chars().count() > self.truncate_len {
            let sha1 = sha1_hex(&text.full_text);
            self.storage
                .put_query_text(&sha1, &text.full_text, self.text_ttl_seconds, now_millis)?;
            return Ok(ResolvedQueryText {
                truncated_text: truncate(&text.full_text, self.truncate_len),
                full_text_sha1: sha1,
            });
        }

        Ok(ResolvedQueryText {
            truncated_text: text.full_text.clone(),
            full_text_sha1: String::new(),
        })
    }

    /// Look up a full text by sha1.
    pub fn full_text(
        &self,
        sha1: &str,
        now_millis: i64,
    ) -> Result<Option<String>, AggregateError> {
        Ok(self.storage.get_query_text(sha1, now_millis)?)
    }
}

/// Hex sha1 of a text.
pub fn sha1_hex(text: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

/// Row-key suffix for clustering columns: a content hash keeps rows with
/// distinct clustering values distinct without putting free-form text in
/// key positions that have to parse.
pub(crate) fn clustering_suffix(parts: &[&str]) -> String {
    let mut hasher = Sha1::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    hex::encode(hasher.finalize())
}

fn truncate(text: &str, len: usize) -> String {
    text.chars().take(len).collect()
}
