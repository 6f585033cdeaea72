//! MemorySession: the three memory tiers of one `(agent_id, user_id)` pair.
//!
//! ```text
//! add_message ──▶ short_term (bounded) ──▶ format_for_prompt
//!        └──────▶ buffer ──extract──▶ long_term (merged facts)
//! working (scratch) ──save──▶ store
//! ```

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};
use wardline_config::MemoryConfig;
use wardline_core::error::MemoryError;
use wardline_core::memory::{MemoryStore, Namespace};
use wardline_core::message::{Message, Role};

use crate::buffer::{BUFFER_META_KEY, ConversationBuffer};
use crate::extractor::MemoryExtractor;
use crate::formatter::{FormatOptions, format_memory};
use crate::long_term::LongTermMemory;
use crate::short_term::ShortTermMemory;
use crate::working::{WORKING_KEY, WorkingMemory};

/// What happens when extraction fails right before eviction.
///
/// Eviction always proceeds so memory stays bounded; the policy only
/// decides how the failure is surfaced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionFailurePolicy {
    /// Log a warning and report the failure in [`AddMessageReport`].
    #[default]
    EvictAndWarn,
    /// Return `MemoryError::ExtractionFailed` from `add_message`.
    EvictAndError,
}

impl std::str::FromStr for ExtractionFailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "evict_and_warn" => Ok(Self::EvictAndWarn),
            "evict_and_error" => Ok(Self::EvictAndError),
            other => Err(format!("unknown extraction failure policy '{other}'")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub short_term_capacity: usize,
    /// Fraction of capacity at which extraction runs ahead of eviction.
    pub extraction_threshold: f64,
    pub failure_policy: ExtractionFailurePolicy,
    pub trigger_count: usize,
    pub trigger_interval: Duration,
    pub cache_ttl: Duration,
    pub format: FormatOptions,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            short_term_capacity: 20,
            extraction_threshold: 0.8,
            failure_policy: ExtractionFailurePolicy::default(),
            trigger_count: 10,
            trigger_interval: Duration::from_secs(300),
            cache_ttl: Duration::from_secs(300),
            format: FormatOptions::default(),
        }
    }
}

impl SessionSettings {
    pub fn from_config(config: &MemoryConfig) -> Self {
        Self {
            short_term_capacity: config.short_term_capacity,
            extraction_threshold: config.extraction_threshold,
            failure_policy: config
                .extraction_failure_policy
                .parse()
                .unwrap_or_default(),
            trigger_count: config.trigger_count,
            trigger_interval: Duration::from_secs(config.trigger_interval_secs),
            cache_ttl: Duration::from_secs(config.cache_ttl_secs),
            format: FormatOptions {
                max_chars: config.prompt_max_chars,
                recent_turns: config.prompt_recent_turns,
            },
        }
    }

    /// Short-term length at which extraction runs before eviction:
    /// `ceil(capacity * threshold)`, at least 1.
    pub fn extraction_point(&self) -> usize {
        let point = (self.short_term_capacity as f64 * self.extraction_threshold).ceil();
        (point as usize).max(1)
    }
}

/// Snapshot of all three tiers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryContext {
    pub working: Map<String, Value>,
    pub short_term: Vec<Message>,
    pub long_term: Map<String, Value>,
}

/// Outcome of [`MemorySession::add_message`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddMessageReport {
    /// Short-term length after eviction.
    pub short_term_len: usize,
    pub evicted: usize,
    /// Whether extraction ran and succeeded ahead of eviction.
    pub extracted: bool,
    /// Extraction failure surfaced under `EvictAndWarn`.
    pub extraction_error: Option<String>,
}

pub struct MemorySession {
    agent_id: String,
    user_id: String,
    namespace: Namespace,
    store: Arc<dyn MemoryStore>,
    settings: SessionSettings,
    extractor: Option<Arc<dyn MemoryExtractor>>,
    working: WorkingMemory,
    working_loaded: bool,
    short_term: ShortTermMemory,
    long_term: LongTermMemory,
    buffer: ConversationBuffer,
}

impl MemorySession {
    pub fn new(
        agent_id: &str,
        user_id: &str,
        store: Arc<dyn MemoryStore>,
        settings: SessionSettings,
    ) -> Self {
        let namespace = Namespace::for_session(agent_id, user_id);
        Self {
            agent_id: agent_id.to_string(),
            user_id: user_id.to_string(),
            short_term: ShortTermMemory::new(
                store.clone(),
                namespace.clone(),
                settings.short_term_capacity,
            ),
            long_term: LongTermMemory::new(store.clone(), namespace.clone(), settings.cache_ttl),
            buffer: ConversationBuffer::new(
                store.clone(),
                namespace.clone(),
                settings.trigger_count,
                settings.trigger_interval,
            ),
            namespace,
            store,
            settings,
            extractor: None,
            working: WorkingMemory::new(),
            working_loaded: false,
        }
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn MemoryExtractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn working(&self) -> &WorkingMemory {
        &self.working
    }

    pub fn working_mut(&mut self) -> &mut WorkingMemory {
        &mut self.working
    }

    /// Load all tiers. Persisted working memory is read once; keys set in
    /// this session before the first load take precedence.
    pub async fn load(&mut self) -> Result<MemoryContext, MemoryError> {
        if !self.working_loaded {
            if let Some(Value::Object(stored)) =
                self.store.get(&self.namespace, WORKING_KEY).await?
            {
                let mut merged = stored;
                merged.extend(self.working.as_map().clone());
                self.working = WorkingMemory::from_map(merged);
            }
            self.working_loaded = true;
        }
        let short_term = self.short_term.history().await?;
        let long_term = self.long_term.get().await?;
        Ok(MemoryContext {
            working: self.working.as_map().clone(),
            short_term,
            long_term,
        })
    }

    /// Short-term history, oldest first.
    pub async fn history(&self) -> Result<Vec<Message>, MemoryError> {
        self.short_term.history().await
    }

    /// Record one turn.
    ///
    /// The message goes to short-term memory and the extraction buffer.
    /// Once short-term memory reaches the extraction point, buffered turns
    /// are extracted when the buffer's trigger fires or when a turn about
    /// to be evicted has not been extracted yet. Eviction then trims
    /// short-term memory to capacity, oldest first, whether or not
    /// extraction succeeded.
    ///
    /// Only extractor failures go through the failure policy. Store errors
    /// are returned as they are.
    pub async fn add_message(
        &mut self,
        role: Role,
        content: &str,
    ) -> Result<AddMessageReport, MemoryError> {
        let message = Message::new(role, content);
        let len = self.short_term.push(&message).await?;
        self.buffer.add(&message).await?;

        let mut report = AddMessageReport {
            short_term_len: len,
            ..Default::default()
        };

        let mut failure = None;
        if self.extractor.is_some()
            && len >= self.settings.extraction_point()
            && self.extraction_due(len).await?
        {
            match self.run_extraction().await {
                Ok(Some(_)) => report.extracted = true,
                Ok(None) => {}
                Err(MemoryError::ExtractionFailed(reason)) => failure = Some(reason),
                Err(e) => return Err(e),
            }
        }

        report.evicted = self.short_term.trim().await?;
        report.short_term_len = len - report.evicted.min(len);
        if report.evicted > 0 {
            debug!(namespace = %self.namespace, evicted = report.evicted, "Short-term memory trimmed");
        }

        if let Some(reason) = failure {
            match self.settings.failure_policy {
                ExtractionFailurePolicy::EvictAndWarn => {
                    warn!(
                        namespace = %self.namespace,
                        error = %reason,
                        evicted = report.evicted,
                        "Extraction failed before eviction"
                    );
                    report.extraction_error = Some(reason);
                }
                ExtractionFailurePolicy::EvictAndError => {
                    return Err(MemoryError::ExtractionFailed(reason));
                }
            }
        }

        Ok(report)
    }

    /// Whether `add_message` has to extract now, with `len` turns in
    /// short-term memory before trimming.
    ///
    /// Buffered turns are the newest ones, so a turn about to be evicted is
    /// unextracted exactly when the buffer reaches back that far.
    async fn extraction_due(&self, len: usize) -> Result<bool, MemoryError> {
        let buffered = self.buffer.count().await?;
        let evicting = len.saturating_sub(self.settings.short_term_capacity);
        if evicting > 0 && buffered + evicting > len {
            return Ok(true);
        }
        self.buffer.should_extract().await
    }

    /// Run the extractor when the buffer's trigger conditions hold.
    ///
    /// Returns the extracted delta, or `None` when nothing ran.
    pub async fn extract_if_needed(&mut self) -> Result<Option<Map<String, Value>>, MemoryError> {
        if self.extractor.is_none() || !self.buffer.should_extract().await? {
            return Ok(None);
        }
        self.run_extraction().await
    }

    /// Extract from the buffer, persist the merged facts, then clear the
    /// buffer. The buffer is only cleared once the facts are stored, so any
    /// failure leaves it intact for a later attempt.
    ///
    /// Extractor failures come back as `MemoryError::ExtractionFailed`;
    /// store errors pass through unchanged.
    async fn run_extraction(&mut self) -> Result<Option<Map<String, Value>>, MemoryError> {
        let Some(extractor) = self.extractor.clone() else {
            return Ok(None);
        };
        let pending = self.buffer.pending().await?;
        if pending.is_empty() {
            return Ok(None);
        }

        let current = self.long_term.get().await?;
        let delta = extractor
            .extract(&pending, &current)
            .await
            .map_err(|e| match e {
                MemoryError::ExtractionFailed(reason) => MemoryError::ExtractionFailed(reason),
                other => MemoryError::ExtractionFailed(other.to_string()),
            })?;
        if !delta.is_empty() {
            self.update_long_term(delta.clone()).await?;
        }
        self.buffer.mark_extracted().await?;
        info!(
            namespace = %self.namespace,
            messages = pending.len(),
            keys = delta.len(),
            "Memory extracted"
        );
        Ok(Some(delta))
    }

    /// Merge `updates` into long-term memory and persist it.
    pub async fn update_long_term(
        &mut self,
        updates: Map<String, Value>,
    ) -> Result<Map<String, Value>, MemoryError> {
        self.long_term.update(updates).await
    }

    pub async fn long_term(&mut self) -> Result<Map<String, Value>, MemoryError> {
        self.long_term.get().await
    }

    /// Render memory for the system prompt. `None` when there is nothing.
    pub async fn format_for_prompt(&mut self) -> Result<Option<String>, MemoryError> {
        let long_term = self.long_term.get().await?;
        let short_term = self.short_term.history().await?;
        Ok(format_memory(
            &long_term,
            &short_term,
            self.working.as_map(),
            self.settings.format,
        ))
    }

    /// Render long-term facts and working scratch only, for callers that
    /// already send short-term history as messages.
    pub async fn format_facts_for_prompt(&mut self) -> Result<Option<String>, MemoryError> {
        let long_term = self.long_term.get().await?;
        Ok(format_memory(
            &long_term,
            &[],
            self.working.as_map(),
            self.settings.format,
        ))
    }

    /// Empty short-term memory only.
    pub async fn clear_history(&mut self) -> Result<(), MemoryError> {
        self.short_term.clear().await
    }

    /// Empty every tier and the buffer, and persist the cleared state.
    pub async fn clear_all(&mut self) -> Result<(), MemoryError> {
        self.working.clear();
        self.working_loaded = true;
        self.short_term.clear().await?;
        self.long_term.delete().await?;
        self.buffer.clear().await?;
        self.store.delete(&self.namespace, WORKING_KEY).await?;
        self.store.delete(&self.namespace, BUFFER_META_KEY).await?;
        info!(namespace = %self.namespace, "Memory cleared");
        Ok(())
    }

    /// Persist working and long-term memory.
    pub async fn save(&mut self) -> Result<(), MemoryError> {
        if self.working.is_empty() {
            self.store.delete(&self.namespace, WORKING_KEY).await?;
        } else {
            self.store
                .set(&self.namespace, WORKING_KEY, self.working.to_value())
                .await?;
        }
        if let Some(facts) = self.long_term.cached().cloned() {
            self.long_term.save(facts).await?;
        }
        debug!(namespace = %self.namespace, "Memory saved");
        Ok(())
    }
}
