use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::AuthorityError;

/// Existence check result from an external authority index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IndexHit {
    pub found: bool,
    pub count: u32,
}

impl IndexHit {
    pub fn found(count: u32) -> Self {
        Self { found: count > 0, count }
    }

    pub fn not_found() -> Self {
        Self::default()
    }
}

/// An external legal-authority index (case law and statute search).
///
/// `Ok(IndexHit { found: false, .. })` means the index answered and has nothing.
/// Errors mean it could not answer; see [`AuthorityError`].
#[async_trait]
pub trait AuthorityIndex: Send + Sync {
    async fn lookup(&self, citation: &str) -> Result<IndexHit, AuthorityError>;

    /// Short name used in logs.
    fn name(&self) -> &str {
        "authority_index"
    }
}
