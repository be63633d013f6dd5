//! Mock generator for testing
//!
//! A deterministic, network-free [`Generator`] for exercising the pipeline
//! without API keys.
//!
//! # Example
//!
//! ```ignore
//! use loctable_mt::{GenerationRequest, Generator, MockGenerator, MockMode};
//!
//! #[tokio::test]
//! async fn test_translation() {
//!     let mock = MockGenerator::new(MockMode::LocaleTag);
//!     let request = GenerationRequest::translate("hello", "hello", "en", "fr", "", None);
//!     assert_eq!(mock.generate(&request).await.unwrap(), "[fr] hello");
//! }
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use loctable::classify;

use crate::error::{MtError, MtResult};
use crate::generator::{GenerationRequest, GenerationTask, Generator};

/// Mock generation modes for testing different scenarios
#[derive(Debug, Clone)]
pub enum MockMode {
    /// Prefix the locale: "hello" → "[fr] hello"
    ///
    /// Markers pass through untouched. Review returns the draft unchanged and
    /// change resolution answers with the deterministic classifier.
    LocaleTag,

    /// Predefined translations keyed by (tokenized text, target locale),
    /// falling back to [`MockMode::LocaleTag`]
    Mappings(HashMap<(String, String), String>),

    /// Reverse the order of whitespace-separated words
    Reorder,

    /// Return the input unchanged
    NoOp,

    /// Fail every call with a non-retryable error
    Error(String),

    /// Fail the first `n` calls as unavailable, then behave like `LocaleTag`
    FailTimes(usize),
}

/// Mock generator that simulates various backend behaviors
///
/// Clones share one call log, so a clone handed to the pipeline can still be
/// inspected from the test.
#[derive(Debug, Clone)]
pub struct MockGenerator {
    mode: MockMode,
    /// Optional simulated network delay (in milliseconds)
    delay_ms: u64,
    calls: Arc<Mutex<Vec<GenerationTask>>>,
}

impl MockGenerator {
    pub fn new(mode: MockMode) -> Self {
        Self {
            mode,
            delay_ms: 0,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Create a MockGenerator with simulated network delay
    pub fn with_delay(mode: MockMode, delay_ms: u64) -> Self {
        Self {
            delay_ms,
            ..Self::new(mode)
        }
    }

    /// Tasks of every call so far, in order
    pub fn calls(&self) -> Vec<GenerationTask> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or(0)
    }

    async fn apply_delay(&self) {
        if self.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
        }
    }

    /// Record the call and return how many calls came before it
    fn record(&self, task: GenerationTask) -> usize {
        match self.calls.lock() {
            Ok(mut calls) => {
                calls.push(task);
                calls.len() - 1
            }
            Err(_) => 0,
        }
    }

    fn locale_tag(request: &GenerationRequest) -> String {
        match request.task {
            GenerationTask::Translate => format!("[{}] {}", request.target_locale, request.text),
            GenerationTask::Review => request
                .draft
                .clone()
                .unwrap_or_else(|| request.text.clone()),
            GenerationTask::ResolveChange => Self::resolve_deterministically(request),
        }
    }

    fn resolve_deterministically(request: &GenerationRequest) -> String {
        let old_text = request.draft.as_deref().unwrap_or_default();
        let result = classify(old_text, &request.text);
        serde_json::json!({
            "decision": result.decision.as_str(),
            "confidence": result.confidence,
            "reason": result.reason,
        })
        .to_string()
    }

    fn apply(&self, request: &GenerationRequest, previous_calls: usize) -> MtResult<String> {
        match &self.mode {
            MockMode::LocaleTag => Ok(Self::locale_tag(request)),
            MockMode::Mappings(map) => {
                let key = (request.text.clone(), request.target_locale.clone());
                match (request.task, map.get(&key)) {
                    (GenerationTask::Translate, Some(mapped)) => Ok(mapped.clone()),
                    _ => Ok(Self::locale_tag(request)),
                }
            }
            MockMode::Reorder => {
                let input = match request.task {
                    GenerationTask::Review => request.draft.as_deref().unwrap_or(&request.text),
                    _ => request.text.as_str(),
                };
                Ok(input.split_whitespace().rev().collect::<Vec<_>>().join(" "))
            }
            MockMode::NoOp => Ok(match request.task {
                GenerationTask::Review => request
                    .draft
                    .clone()
                    .unwrap_or_else(|| request.text.clone()),
                _ => request.text.clone(),
            }),
            MockMode::Error(msg) => Err(MtError::Translation(msg.clone())),
            MockMode::FailTimes(n) if previous_calls < *n => Err(MtError::GeneratorUnavailable(
                format!("simulated outage (call {})", previous_calls + 1),
            )),
            MockMode::FailTimes(_) => Ok(Self::locale_tag(request)),
        }
    }
}

#[async_trait]
impl Generator for MockGenerator {
    async fn generate(&self, request: &GenerationRequest) -> MtResult<String> {
        let previous_calls = self.record(request.task);
        self.apply_delay().await;
        self.apply(request, previous_calls)
    }

    fn provider_name(&self) -> &str {
        "Mock Generator"
    }
}
