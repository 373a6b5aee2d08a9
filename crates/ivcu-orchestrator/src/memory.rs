//! Optional context-retrieval collaborator consulted before generation.
//!
//! Kept to the single-method interface the spec names: `retrieve(query) →
//! string`. A real deployment backs this with a vector store; this crate
//! only defines the seam and a couple of in-memory fakes for tests.

use async_trait::async_trait;
use std::collections::HashMap;

#[async_trait]
pub trait MemoryRetriever: Send + Sync {
    /// Returns additional context to fold into the generation prompt, or an
    /// empty string if nothing relevant was found.
    async fn retrieve(&self, query: &str) -> String;
}

/// Always returns no context — the default when no memory backend is wired
/// up.
pub struct NullMemoryRetriever;

#[async_trait]
impl MemoryRetriever for NullMemoryRetriever {
    async fn retrieve(&self, _query: &str) -> String {
        String::new()
    }
}

/// Scripted retriever for tests: exact substring match on query against a
/// fixed table of canned context strings.
#[derive(Default)]
pub struct FakeMemoryRetriever {
    entries: HashMap<String, String>,
}

impl FakeMemoryRetriever {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entry(mut self, query_contains: impl Into<String>, context: impl Into<String>) -> Self {
        self.entries.insert(query_contains.into(), context.into());
        self
    }
}

#[async_trait]
impl MemoryRetriever for FakeMemoryRetriever {
    async fn retrieve(&self, query: &str) -> String {
        self.entries
            .iter()
            .find(|(needle, _)| query.contains(needle.as_str()))
            .map(|(_, context)| context.clone())
            .unwrap_or_default()
    }
}
