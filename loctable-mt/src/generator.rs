//! Text generation trait and request types
//!
//! The pipeline talks to every backend (OpenAI-compatible HTTP, mock) through
//! the [`Generator`] trait. The text to translate arrives with placeholders
//! and glossary terms replaced by markers, and the answer must keep those
//! markers. Prompts may still quote the original source for context.
//!
//! # Example
//!
//! ```ignore
//! use loctable_mt::{GenerationRequest, Generator, MockGenerator, MockMode};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let generator = MockGenerator::new(MockMode::LocaleTag);
//!     let request = GenerationRequest::translate(
//!         "Deal {0} DMG", "Deal ⟦PH_1⟧ ⟦TERM_1⟧", "en", "de-DE", "", None,
//!     );
//!     let result = generator.generate(&request).await?;
//!     println!("{}", result); // "[de-DE] Deal ⟦PH_1⟧ ⟦TERM_1⟧"
//!     Ok(())
//! }
//! ```

use async_trait::async_trait;
use loctable::SegmentContext;
use serde::{Deserialize, Serialize};

use crate::error::{MtError, MtResult};
use crate::prompts;

/// What a generator call is for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GenerationTask {
    /// First-pass translation of tokenized source text
    Translate,
    /// Second pass over a tokenized draft, markers preserved
    Review,
    /// Disambiguate a source revision the change classifier could not decide
    ResolveChange,
}

impl GenerationTask {
    pub fn as_str(&self) -> &'static str {
        match self {
            GenerationTask::Translate => "translator",
            GenerationTask::Review => "reviewer",
            GenerationTask::ResolveChange => "change-resolver",
        }
    }

    /// Sampling temperature used for this task
    pub fn temperature(&self) -> f32 {
        match self {
            GenerationTask::Translate => 0.2,
            GenerationTask::Review => 0.1,
            GenerationTask::ResolveChange => 0.0,
        }
    }
}

/// One request to a generator
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub task: GenerationTask,
    /// Full instruction text, see [`prompts`]
    pub prompt: String,
    /// Untouched source text, for context only
    pub source_text: String,
    /// Tokenized text to work on. For [`GenerationTask::ResolveChange`] this is
    /// the new source text.
    pub text: String,
    /// Review: the tokenized draft. ResolveChange: the old source text.
    pub draft: Option<String>,
    pub source_locale: String,
    pub target_locale: String,
    pub style_hints: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

const DEFAULT_MAX_TOKENS: u32 = 1024;

impl GenerationRequest {
    pub fn translate(
        source_text: &str,
        protected_text: &str,
        source_locale: &str,
        target_locale: &str,
        style_hints: &str,
        context: Option<&SegmentContext>,
    ) -> Self {
        let task = GenerationTask::Translate;
        GenerationRequest {
            task,
            prompt: prompts::translation_prompt(
                source_text,
                protected_text,
                target_locale,
                style_hints,
                context,
            ),
            source_text: source_text.to_string(),
            text: protected_text.to_string(),
            draft: None,
            source_locale: source_locale.to_string(),
            target_locale: target_locale.to_string(),
            style_hints: style_hints.to_string(),
            temperature: task.temperature(),
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }

    pub fn review(
        source_text: &str,
        protected_text: &str,
        draft: &str,
        source_locale: &str,
        target_locale: &str,
        style_hints: &str,
    ) -> Self {
        let task = GenerationTask::Review;
        GenerationRequest {
            task,
            prompt: prompts::review_prompt(source_text, draft, target_locale, style_hints),
            source_text: source_text.to_string(),
            text: protected_text.to_string(),
            draft: Some(draft.to_string()),
            source_locale: source_locale.to_string(),
            target_locale: target_locale.to_string(),
            style_hints: style_hints.to_string(),
            temperature: task.temperature(),
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }

    pub fn resolve_change(
        old_text: &str,
        new_text: &str,
        source_locale: &str,
        target_locale: &str,
    ) -> Self {
        let task = GenerationTask::ResolveChange;
        GenerationRequest {
            task,
            prompt: prompts::change_resolution_prompt(old_text, new_text, target_locale),
            source_text: new_text.to_string(),
            text: new_text.to_string(),
            draft: Some(old_text.to_string()),
            source_locale: source_locale.to_string(),
            target_locale: target_locale.to_string(),
            style_hints: String::new(),
            temperature: task.temperature(),
            max_tokens: 256,
        }
    }
}

/// Generic trait for text generation backends
///
/// All methods are async to support network-bound implementations.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Run one request and return the generated text
    ///
    /// # Returns
    ///
    /// * `Ok(String)` - Generated text, markers expected intact
    /// * `Err(MtError)` - Transient errors ([`MtError::is_transient`]) may be retried
    async fn generate(&self, request: &GenerationRequest) -> MtResult<String>;

    /// Run several requests, results in input order
    ///
    /// The default runs them one after another.
    async fn generate_batch(&self, requests: &[GenerationRequest]) -> MtResult<Vec<String>> {
        let mut results = Vec::with_capacity(requests.len());
        for request in requests {
            results.push(self.generate(request).await?);
        }
        Ok(results)
    }

    /// Name used in logs
    fn provider_name(&self) -> &str;
}

/// Normalize a locale code by stripping region and script
///
/// - `en-US` → `en`
/// - `zh-Hans` → `zh`
/// - `pt_BR` → `pt`
pub fn normalize_locale(locale: &str) -> String {
    locale
        .split(['-', '_'])
        .next()
        .unwrap_or(locale)
        .to_lowercase()
}

/// Validate a BCP-47 locale code and return its canonical form
///
/// ```ignore
/// assert_eq!(validate_locale("de_de")?, "de-DE");
/// validate_locale("invalid@code").unwrap_err();
/// ```
pub fn validate_locale(locale: &str) -> MtResult<String> {
    loctable::canonicalize(locale).map_err(|e| MtError::InvalidLocale(e.to_string()))
}
