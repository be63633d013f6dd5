//! Translation memory, risk-gated generation and batch pipeline for loctable
//!
//! # Workflow Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use loctable::{Glossary, GlossaryTerm, Segment};
//! use loctable_mt::{MockGenerator, MockMode, Pipeline, PipelineConfig, Store};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // 1. Open the local store (memory, candidates, flags)
//!     let store = Arc::new(Store::open("loctable.db").await?);
//!
//!     // 2. Wire a generator and the glossary
//!     let generator = Arc::new(MockGenerator::new(MockMode::LocaleTag));
//!     let glossary = Glossary::new(vec![GlossaryTerm::new("DMG", "SCH", "de-DE")]);
//!     let pipeline = Pipeline::new(store, generator, PipelineConfig::default())
//!         .with_glossary(glossary);
//!
//!     // 3. Run a batch
//!     let segments = vec![Segment::new("ui.deal", "en", "Deal {0} DMG\nNow")?];
//!     let report = pipeline.run_batch(&segments, &["de-DE".to_string()]).await;
//!
//!     // "[de-DE] Deal {0} SCH\nNow"
//!     println!("{:?}", report.rows[0].text);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod escalation;
pub mod generator;
pub mod memory;
pub mod mock;
pub mod openai;
pub mod pipeline;
pub mod prompts;
pub mod state;

// End-to-end pipeline tests (only available during testing)
#[cfg(test)]
mod integration_tests;

pub use config::PipelineConfig;
pub use error::{MtError, MtResult};
pub use escalation::{ChangeEscalation, ChangeQuery, GeneratorEscalation, classify_with_escalation};
pub use generator::{GenerationRequest, GenerationTask, Generator, normalize_locale, validate_locale};
pub use memory::{
    ApprovalRequest, ApprovedTranslation, FuzzyHit, MemoryEntry, MemoryScope, NewCandidate,
    RowOutcome, RowStatus, Store, StoredChangeDecision, TranslationCandidate,
};
pub use mock::{MockGenerator, MockMode};
pub use openai::OpenAiGenerator;
pub use pipeline::{
    BatchReport, CancelToken, Pipeline, RowDisposition, RowFailure, RowReport, risk_score,
};
pub use state::{RowState, StateTrail};
