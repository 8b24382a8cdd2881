//! Work-source enumeration
//!
//! A work source turns a job kind into the list of items to crawl. Sources
//! also tell the engine how item identity is derived for that kind.

mod listing;

pub use listing::ConfiguredSource;

use crate::crawler::{IdentityRule, WorkItem};
use crate::CrawlError;
use async_trait::async_trait;
use std::collections::HashMap;

/// Produces work items for a job kind
#[async_trait]
pub trait WorkSource: Send + Sync {
    /// Lists the items for one run of `kind`
    ///
    /// An error means no work can proceed and fails the job.
    async fn enumerate(&self, kind: &str) -> Result<Vec<WorkItem>, CrawlError>;

    /// How items of `kind` are identified
    fn identity(&self, _kind: &str) -> IdentityRule {
        IdentityRule::Content
    }
}

/// Fixed URL lists per kind
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    kinds: HashMap<String, (Vec<String>, IdentityRule)>,
}

impl StaticSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_kind<I, S>(mut self, kind: &str, urls: I, identity: IdentityRule) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let urls = urls.into_iter().map(Into::into).collect();
        self.kinds.insert(kind.to_string(), (urls, identity));
        self
    }
}

#[async_trait]
impl WorkSource for StaticSource {
    async fn enumerate(&self, kind: &str) -> Result<Vec<WorkItem>, CrawlError> {
        let (urls, _) = self.kinds.get(kind).ok_or_else(|| CrawlError::Enumeration {
            kind: kind.to_string(),
            reason: "no source configured for this kind".to_string(),
        })?;

        Ok(urls.iter().map(WorkItem::new).collect())
    }

    fn identity(&self, kind: &str) -> IdentityRule {
        self.kinds
            .get(kind)
            .map(|(_, identity)| identity.clone())
            .unwrap_or_default()
    }
}
