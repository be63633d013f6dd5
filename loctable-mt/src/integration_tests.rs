//! End-to-end tests for the translation pipeline
//!
//! Everything runs against the deterministic mock generator and an in-memory
//! (or temporary file) store, so no network or API key is needed.
//!
//! ```bash
//! cargo test -p loctable-mt integration_tests -- --nocapture
//! ```

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use async_trait::async_trait;
    use loctable::{
        CandidateOrigin, ChangeClassification, ChangeDecision, ChangeRule, CompoundStrategy,
        Glossary, GlossaryTerm, IssueKind, Segment,
    };

    use crate::*;

    fn dmg_glossary() -> Glossary {
        Glossary::new(vec![GlossaryTerm::new("DMG", "SCH", "de-DE")])
    }

    async fn setup(mode: MockMode, glossary: Glossary) -> (Pipeline, MockGenerator) {
        let mock = MockGenerator::new(mode);
        let store = Arc::new(Store::open_in_memory().await.unwrap());
        let pipeline = Pipeline::new(store, Arc::new(mock.clone()), PipelineConfig::default())
            .with_glossary(glossary);
        (pipeline, mock)
    }

    fn de() -> Vec<String> {
        vec!["de-DE".to_string()]
    }

    fn kinds(report: &RowReport) -> Vec<IssueKind> {
        report.issues.iter().map(|i| i.kind).collect()
    }

    // ============================================================================
    // Protection + glossary end to end
    // ============================================================================

    #[tokio::test]
    async fn test_e2e_placeholder_newline_and_term() {
        let (pipeline, mock) = setup(MockMode::LocaleTag, dmg_glossary()).await;
        let segment = Segment::new("ui.deal", "en", "Deal {0} DMG\nNow").unwrap();

        let report = pipeline.run_segment(&segment, "de-DE").await.unwrap();

        let text = report.text.clone().unwrap();
        assert_eq!(text, "[de-DE] Deal {0} SCH\nNow");
        assert!(text.contains("{0}"));
        assert!(text.contains('\n'));
        assert!(!text.contains("DMG"));
        assert!(report.issues.is_empty(), "unexpected flags: {:?}", report.issues);
        assert_eq!(report.origin, Some(CandidateOrigin::Generated));
        assert_eq!(report.risk_score, Some(2));
        assert_eq!(mock.calls(), vec![GenerationTask::Translate]);
        assert_eq!(
            report.states,
            vec![
                RowState::Pending,
                RowState::MemoryChecked,
                RowState::GenerationNeeded,
                RowState::Generated,
                RowState::SkippedReview,
                RowState::QaChecked,
                RowState::Done,
            ]
        );

        let store = pipeline.store();
        let current = store.current_candidate("ui.deal", "de-DE").await.unwrap().unwrap();
        assert_eq!(current.text, text);
        assert_eq!(Some(current.id), report.candidate_id);
        assert!(store.flags_for("ui.deal", "de-DE").await.unwrap().is_empty());
        assert!(store.is_ready_to_approve("ui.deal", "de-DE").await.unwrap());
        assert_eq!(
            store.row_state("ui.deal", "de-DE").await.unwrap().unwrap().state,
            RowState::Done
        );
    }

    #[tokio::test]
    async fn test_term_inside_other_token_untouched() {
        let (pipeline, _) = setup(MockMode::LocaleTag, dmg_glossary()).await;
        let segment = Segment::new("row-1", "en", "ADMGX deals DMG").unwrap();
        let report = pipeline.run_segment(&segment, "de-DE").await.unwrap();
        assert_eq!(report.text.as_deref(), Some("[de-DE] ADMGX deals SCH"));
        assert!(report.issues.is_empty());
    }

    #[tokio::test]
    async fn test_compound_hyphenated_through_pipeline() {
        let glossary = Glossary::new(vec![
            GlossaryTerm::new("DMG", "SCH", "de-DE").with_compounds(CompoundStrategy::Hyphenate),
        ]);
        let (pipeline, _) = setup(MockMode::LocaleTag, glossary).await;
        let segment = Segment::new("row-1", "en", "DMGBoost is active").unwrap();
        let report = pipeline.run_segment(&segment, "de-DE").await.unwrap();
        assert_eq!(report.text.as_deref(), Some("[de-DE] SCH-Boost is active"));
        assert!(report.issues.is_empty());
    }

    #[tokio::test]
    async fn test_negative_pattern_suppresses_term() {
        let glossary = Glossary::new(vec![
            GlossaryTerm::new("DMG", "SCH", "de-DE").with_negative_pattern("IGNORE"),
        ]);
        let (pipeline, _) = setup(MockMode::LocaleTag, glossary).await;
        let segment = Segment::new("row-1", "en", "IGNORE the DMG here").unwrap();
        let report = pipeline.run_segment(&segment, "de-DE").await.unwrap();
        assert_eq!(report.text.as_deref(), Some("[de-DE] IGNORE the DMG here"));
    }

    #[tokio::test]
    async fn test_glossary_only_for_its_locale() {
        let (pipeline, _) = setup(MockMode::LocaleTag, dmg_glossary()).await;
        let segment = Segment::new("row-1", "en", "Deal more DMG").unwrap();
        let report = pipeline.run_segment(&segment, "fr-FR").await.unwrap();
        assert_eq!(report.text.as_deref(), Some("[fr-FR] Deal more DMG"));
    }

    // ============================================================================
    // Review gate
    // ============================================================================

    #[tokio::test]
    async fn test_risky_row_is_reviewed() {
        let (pipeline, mock) = setup(MockMode::LocaleTag, Glossary::default()).await;
        let segment = Segment::new("row-1", "en", "Heal <b>{0}</b>")
            .unwrap()
            .with_char_limit(40);
        let report = pipeline.run_segment(&segment, "de-DE").await.unwrap();
        assert_eq!(report.risk_score, Some(7));
        assert_eq!(report.origin, Some(CandidateOrigin::GeneratedReviewed));
        assert_eq!(report.text.as_deref(), Some("[de-DE] Heal <b>{0}</b>"));
        assert_eq!(
            mock.calls(),
            vec![GenerationTask::Translate, GenerationTask::Review]
        );
        assert!(report.states.contains(&RowState::Reviewed));
    }

    #[tokio::test]
    async fn test_low_risk_row_skips_review() {
        let (pipeline, mock) = setup(MockMode::LocaleTag, Glossary::default()).await;
        let segment = Segment::new("row-1", "en", "Heal {0}").unwrap();
        let report = pipeline.run_segment(&segment, "de-DE").await.unwrap();
        assert_eq!(report.risk_score, Some(4));
        assert_eq!(report.origin, Some(CandidateOrigin::Generated));
        assert_eq!(mock.call_count(), 1);
    }

    // ============================================================================
    // QA flags
    // ============================================================================

    #[tokio::test]
    async fn test_limit_violation_is_error_flag() {
        let (pipeline, _) = setup(MockMode::LocaleTag, Glossary::default()).await;
        let segment = Segment::new("row-1", "en", "Open the inventory")
            .unwrap()
            .with_char_limit(10);
        let report = pipeline.run_segment(&segment, "de-DE").await.unwrap();

        assert_eq!(report.disposition, RowDisposition::Done);
        assert_eq!(kinds(&report), vec![IssueKind::LimitExceeded]);
        let store = pipeline.store();
        assert!(store.current_candidate("row-1", "de-DE").await.unwrap().is_some());
        assert!(!store.is_ready_to_approve("row-1", "de-DE").await.unwrap());
    }

    #[tokio::test]
    async fn test_dropped_placeholder_flags_but_batch_continues() {
        let mut map = HashMap::new();
        map.insert(
            ("Deal ⟦PH_1⟧ damage".to_string(), "de-DE".to_string()),
            "Verursacht Schaden".to_string(),
        );
        let (pipeline, _) = setup(MockMode::Mappings(map), Glossary::default()).await;
        let segments = vec![
            Segment::new("bad", "en", "Deal {0} damage").unwrap(),
            Segment::new("good", "en", "Open the inventory").unwrap(),
        ];

        let report = pipeline.run_batch(&segments, &de()).await;

        assert_eq!(report.processed, 2);
        assert_eq!(report.failed, 0);
        assert_eq!(report.flagged, 1);
        let bad = &report.rows[0];
        assert_eq!(bad.segment_id, "bad");
        assert_eq!(bad.text.as_deref(), Some("Verursacht Schaden"));
        assert!(kinds(bad).contains(&IssueKind::TokenMismatch));
        assert!(kinds(bad).contains(&IssueKind::PlaceholderMismatch));

        let store = pipeline.store();
        assert!(!store.is_ready_to_approve("bad", "de-DE").await.unwrap());
        assert!(store.is_ready_to_approve("good", "de-DE").await.unwrap());
    }

    #[tokio::test]
    async fn test_dropped_term_marker_is_flagged() {
        let mut map = HashMap::new();
        map.insert(
            ("Deal ⟦PH_1⟧ ⟦TERM_1⟧".to_string(), "de-DE".to_string()),
            "Verursacht ⟦PH_1⟧ Schaden".to_string(),
        );
        let (pipeline, _) = setup(MockMode::Mappings(map), dmg_glossary()).await;
        let segment = Segment::new("row-1", "en", "Deal {0} DMG").unwrap();
        let report = pipeline.run_segment(&segment, "de-DE").await.unwrap();

        assert_eq!(report.text.as_deref(), Some("Verursacht {0} Schaden"));
        assert!(kinds(&report).contains(&IssueKind::TermTokenMismatch));
        assert!(kinds(&report).contains(&IssueKind::GlossaryViolation));
        assert!(!kinds(&report).contains(&IssueKind::TokenMismatch));
    }

    #[tokio::test]
    async fn test_rerun_supersedes_flags() {
        let (pipeline, _) = setup(MockMode::LocaleTag, Glossary::default()).await;
        let mut segment = Segment::new("row-1", "en", "Open the inventory")
            .unwrap()
            .with_char_limit(10);
        pipeline.run_segment(&segment, "de-DE").await.unwrap();
        assert_eq!(pipeline.store().flags_for("row-1", "de-DE").await.unwrap().len(), 1);

        segment.reimport("Open bag").unwrap();
        segment.char_limit = Some(40);
        pipeline.run_segment(&segment, "de-DE").await.unwrap();
        assert!(pipeline.store().flags_for("row-1", "de-DE").await.unwrap().is_empty());
        assert_eq!(pipeline.store().candidates_for("row-1", "de-DE").await.unwrap().len(), 2);
    }

    // ============================================================================
    // Memory
    // ============================================================================

    #[tokio::test]
    async fn test_exact_memory_hit_skips_generation() {
        let (pipeline, mock) = setup(MockMode::LocaleTag, Glossary::default()).await;
        let scope = MemoryScope::new("default", "en", "de-DE");
        let entry_id = pipeline
            .store()
            .approve(&ApprovalRequest::new(scope, "row-0", "Open the inventory", "Inventar öffnen"))
            .await
            .unwrap();

        let segment = Segment::new("row-1", "en", "  open THE   inventory ").unwrap();
        let report = pipeline.run_segment(&segment, "de-DE").await.unwrap();

        assert_eq!(report.text.as_deref(), Some("Inventar öffnen"));
        assert_eq!(report.origin, Some(CandidateOrigin::MemoryExact));
        assert!(report.states.contains(&RowState::MemoryHit));
        assert_eq!(mock.call_count(), 0);
        let entry = pipeline.store().memory_entry(&entry_id).await.unwrap().unwrap();
        assert_eq!(entry.use_count, 1);
        let candidate = pipeline.store().current_candidate("row-1", "de-DE").await.unwrap().unwrap();
        assert_eq!(candidate.memory_entry_id, Some(entry_id));
    }

    #[tokio::test]
    async fn test_fuzzy_memory_hit_above_threshold() {
        let (pipeline, mock) = setup(MockMode::LocaleTag, Glossary::default()).await;
        let scope = MemoryScope::new("default", "en", "de-DE");
        pipeline
            .store()
            .approve(&ApprovalRequest::new(
                scope,
                "row-0",
                "Open the inventory now",
                "Inventar jetzt öffnen",
            ))
            .await
            .unwrap();

        let close = Segment::new("row-1", "en", "Open the inventory now!").unwrap();
        let report = pipeline.run_segment(&close, "de-DE").await.unwrap();
        assert_eq!(report.origin, Some(CandidateOrigin::MemoryFuzzy));
        assert_eq!(report.text.as_deref(), Some("Inventar jetzt öffnen"));
        assert_eq!(mock.call_count(), 0);

        let far = Segment::new("row-2", "en", "Close the inventory later").unwrap();
        let report = pipeline.run_segment(&far, "de-DE").await.unwrap();
        assert_eq!(report.origin, Some(CandidateOrigin::Generated));
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test]
    async fn test_memory_is_scoped_to_project() {
        let (pipeline, mock) = setup(MockMode::LocaleTag, Glossary::default()).await;
        let other = MemoryScope::new("other-game", "en", "de-DE");
        pipeline
            .store()
            .approve(&ApprovalRequest::new(other, "row-0", "Open the inventory", "Inventar öffnen"))
            .await
            .unwrap();
        let segment = Segment::new("row-1", "en", "Open the inventory").unwrap();
        let report = pipeline.run_segment(&segment, "de-DE").await.unwrap();
        assert_eq!(report.origin, Some(CandidateOrigin::Generated));
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test]
    async fn test_drafts_never_reach_memory() {
        let (pipeline, _) = setup(MockMode::LocaleTag, dmg_glossary()).await;
        let segments: Vec<Segment> = (0..8)
            .map(|i| Segment::new(&format!("row-{i}"), "en", &format!("Deal {i} DMG")).unwrap())
            .collect();
        let report = pipeline
            .run_batch(&segments, &["de-DE".to_string(), "fr-FR".to_string()])
            .await;
        assert_eq!(report.processed, 16);
        assert_eq!(pipeline.store().memory_entry_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_approve_then_reuse_across_rows() {
        let (pipeline, mock) = setup(MockMode::LocaleTag, Glossary::default()).await;
        let first = Segment::new("row-1", "en", "Open the inventory").unwrap();
        let report = pipeline.run_segment(&first, "de-DE").await.unwrap();

        let scope = MemoryScope::new("default", "en", "de-DE");
        let mut request = ApprovalRequest::new(scope, "row-1", "Open the inventory", "Inventar öffnen");
        request.candidate_id = report.candidate_id.clone();
        pipeline.store().approve(&request).await.unwrap();
        assert_eq!(pipeline.store().memory_entry_count().await.unwrap(), 1);
        assert_eq!(
            pipeline
                .store()
                .current_candidate("row-1", "de-DE")
                .await
                .unwrap()
                .unwrap()
                .id,
            report.candidate_id.unwrap()
        );

        let second = Segment::new("row-2", "en", "Open the inventory").unwrap();
        let report = pipeline.run_segment(&second, "de-DE").await.unwrap();
        assert_eq!(report.origin, Some(CandidateOrigin::MemoryExact));
        assert_eq!(mock.call_count(), 1);
    }

    // ============================================================================
    // Batches: restart, concurrency, cancellation
    // ============================================================================

    #[tokio::test]
    async fn test_batch_is_restartable() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("loctable.db");
        let mock = MockGenerator::new(MockMode::LocaleTag);
        let mut segments: Vec<Segment> = (0..5)
            .map(|i| Segment::new(&format!("row-{i}"), "en", &format!("Open chest number {i}")).unwrap())
            .collect();

        {
            let store = Arc::new(Store::open(&path).await.unwrap());
            let pipeline = Pipeline::new(store, Arc::new(mock.clone()), PipelineConfig::default());
            let report = pipeline.run_batch(&segments, &de()).await;
            assert_eq!(report.processed, 5);
        }

        let store = Arc::new(Store::open(&path).await.unwrap());
        let pipeline = Pipeline::new(store, Arc::new(mock.clone()), PipelineConfig::default());
        let report = pipeline.run_batch(&segments, &de()).await;
        assert_eq!(report.processed, 0);
        assert_eq!(report.skipped, 5);
        assert_eq!(mock.call_count(), 5);

        // A re-imported row is processed again
        segments[2].reimport("Open chest number two").unwrap();
        let report = pipeline.run_batch(&segments, &de()).await;
        assert_eq!(report.processed, 1);
        assert_eq!(report.skipped, 4);
        assert_eq!(mock.call_count(), 6);
    }

    #[tokio::test]
    async fn test_failed_rows_are_retried_next_run() {
        let mock = MockGenerator::new(MockMode::FailTimes(2));
        let store = Arc::new(Store::open_in_memory().await.unwrap());
        let config = PipelineConfig {
            batch_concurrency: 1,
            ..PipelineConfig::default()
        };
        let pipeline = Pipeline::new(store, Arc::new(mock.clone()), config);
        let segments = vec![Segment::new("row-1", "en", "Open the inventory").unwrap()];

        let report = pipeline.run_batch(&segments, &de()).await;
        assert_eq!(report.failed, 1);
        assert_eq!(report.failures[0].segment_id, "row-1");
        assert_eq!(
            pipeline.store().row_state("row-1", "de-DE").await.unwrap().unwrap().state,
            RowState::Pending
        );

        let report = pipeline.run_batch(&segments, &de()).await;
        assert_eq!(report.processed, 1);
        assert_eq!(report.failed, 0);
    }

    #[tokio::test]
    async fn test_concurrent_batch_writes_every_row() {
        let mock = MockGenerator::with_delay(MockMode::LocaleTag, 5);
        let store = Arc::new(Store::open_in_memory().await.unwrap());
        let pipeline = Pipeline::new(store, Arc::new(mock.clone()), PipelineConfig::default())
            .with_glossary(dmg_glossary());
        let segments: Vec<Segment> = (0..20)
            .map(|i| Segment::new(&format!("row-{i:02}"), "en", &format!("Row {i} deals DMG")).unwrap())
            .collect();
        let locales = vec!["de-DE".to_string(), "fr-FR".to_string()];

        let report = pipeline.run_batch(&segments, &locales).await;

        assert_eq!(report.processed, 40);
        assert_eq!(report.flagged, 0);
        assert_eq!(mock.call_count(), 40);
        assert_eq!(report.rows[0].segment_id, "row-00");
        assert_eq!(report.rows[0].target_locale, "de-DE");
        for segment in &segments {
            let de = pipeline.store().current_candidate(&segment.id, "de-DE").await.unwrap().unwrap();
            assert!(de.text.ends_with("deals SCH"));
            let fr = pipeline.store().current_candidate(&segment.id, "fr-FR").await.unwrap().unwrap();
            assert!(fr.text.ends_with("deals DMG"));
        }
    }

    #[tokio::test]
    async fn test_cancel_mid_batch_keeps_committed_rows() {
        let mock = MockGenerator::with_delay(MockMode::LocaleTag, 50);
        let store = Arc::new(Store::open_in_memory().await.unwrap());
        let config = PipelineConfig {
            batch_concurrency: 1,
            ..PipelineConfig::default()
        };
        let pipeline = Pipeline::new(store, Arc::new(mock.clone()), config);
        let cancel = pipeline.cancel_token();
        let segments: Vec<Segment> = (0..10)
            .map(|i| Segment::new(&format!("row-{i}"), "en", &format!("Open chest number {i}")).unwrap())
            .collect();

        let runner = pipeline.clone();
        let handle = tokio::spawn(async move { runner.run_batch(&segments, &de()).await });
        tokio::time::sleep(std::time::Duration::from_millis(75)).await;
        cancel.cancel();
        let report = handle.await.unwrap();

        assert!(report.processed >= 1);
        assert!(report.cancelled >= 1);
        assert_eq!(report.processed + report.cancelled, 10);
        assert_eq!(report.failed, 0);
        assert_eq!(mock.call_count(), report.processed);
        for row in report.rows.iter().filter(|r| r.disposition == RowDisposition::Done) {
            assert!(
                pipeline
                    .store()
                    .current_candidate(&row.segment_id, "de-DE")
                    .await
                    .unwrap()
                    .is_some()
            );
        }
    }

    // ============================================================================
    // Change impact
    // ============================================================================

    fn changed(id: &str, old_text: &str, new_text: &str) -> Segment {
        Segment::new(id, "en", new_text).unwrap().with_prior_source(old_text)
    }

    #[tokio::test]
    async fn test_change_batch_decisions() {
        let (pipeline, mock) = setup(MockMode::LocaleTag, Glossary::default()).await;
        let segments = vec![
            changed("keep", "Hello world", "Hello  world"),
            changed("update", "Deal 5 DMG", "Deal 50 DMG to target"),
            changed("flag", "Heal {0}", "Heal <b>{0}</b>"),
            Segment::new("same", "en", "Unchanged text").unwrap(),
        ];

        let report = pipeline.run_change_batch(&segments, &de()).await;
        assert_eq!(report.processed, 3);
        assert_eq!(report.skipped, 1);
        assert_eq!(mock.call_count(), 2);

        let store = pipeline.store();

        let keep = store.change_decision("keep", "de-DE").await.unwrap().unwrap();
        assert_eq!(keep.classification.decision, ChangeDecision::Keep);
        assert!(keep.candidate_id.is_none());
        assert!(store.current_candidate("keep", "de-DE").await.unwrap().is_none());
        let flags = store.flags_for("keep", "de-DE").await.unwrap();
        assert_eq!(flags.len(), 1);
        assert_eq!(flags[0].kind, IssueKind::StaleSource);

        let update = store.change_decision("update", "de-DE").await.unwrap().unwrap();
        assert_eq!(update.classification.decision, ChangeDecision::Update);
        let candidate = store.current_candidate("update", "de-DE").await.unwrap().unwrap();
        assert_eq!(candidate.origin, CandidateOrigin::ChangeProposal);
        assert_eq!(candidate.text, "[de-DE] Deal 50 DMG to target");
        assert_eq!(update.candidate_id, Some(candidate.id));

        let flag = store.change_decision("flag", "de-DE").await.unwrap().unwrap();
        assert_eq!(flag.classification.decision, ChangeDecision::Flag);
        assert_eq!(flag.classification.rule, ChangeRule::PlaceholderDrift);
        let kinds: Vec<IssueKind> = store
            .flags_for("flag", "de-DE")
            .await
            .unwrap()
            .into_iter()
            .map(|i| i.kind)
            .collect();
        assert_eq!(kinds, vec![IssueKind::StaleSource, IssueKind::AmbiguousChange]);
        assert!(store.is_ready_to_approve("flag", "de-DE").await.unwrap());
        assert_eq!(
            store.current_candidate("flag", "de-DE").await.unwrap().unwrap().origin,
            CandidateOrigin::ChangeProposal
        );

        // Second run finds every decision already stored
        let report = pipeline.run_change_batch(&segments, &de()).await;
        assert_eq!(report.processed, 0);
        assert_eq!(report.skipped, 4);
        assert_eq!(mock.call_count(), 2);
    }

    #[tokio::test]
    async fn test_change_with_limit_violation_stays_flag() {
        let (pipeline, _) = setup(MockMode::LocaleTag, Glossary::default()).await;
        let segment = changed("row-1", "Attack the gate", "Attack that gate").with_char_limit(10);
        let report = pipeline.run_change_segment(&segment, "de-DE").await.unwrap();
        assert_eq!(report.change.as_ref().unwrap().decision, ChangeDecision::Flag);
        assert!(kinds(&report).contains(&IssueKind::LimitExceeded));
        assert!(kinds(&report).contains(&IssueKind::AmbiguousChange));
    }

    struct AlwaysKeep;

    #[async_trait]
    impl ChangeEscalation for AlwaysKeep {
        async fn resolve(&self, _query: &ChangeQuery<'_>) -> MtResult<ChangeClassification> {
            Ok(ChangeClassification {
                decision: ChangeDecision::Keep,
                confidence: 0.7,
                reason: "Same meaning".to_string(),
                rule: ChangeRule::Escalated,
            })
        }
    }

    #[tokio::test]
    async fn test_escalation_resolves_ambiguous_change() {
        let (pipeline, mock) = setup(MockMode::LocaleTag, Glossary::default()).await;
        let pipeline = pipeline.with_escalation(Arc::new(AlwaysKeep));
        let segments = vec![
            changed("ambiguous", "Attack the gate", "Attack that gate"),
            changed("drift", "Heal {0}", "Heal <b>{0}</b>"),
        ];
        let report = pipeline.run_change_batch(&segments, &de()).await;
        assert_eq!(report.processed, 2);

        let ambiguous = pipeline.store().change_decision("ambiguous", "de-DE").await.unwrap().unwrap();
        assert_eq!(ambiguous.classification.decision, ChangeDecision::Keep);
        assert_eq!(ambiguous.classification.rule, ChangeRule::Escalated);

        let drift = pipeline.store().change_decision("drift", "de-DE").await.unwrap().unwrap();
        assert_eq!(drift.classification.decision, ChangeDecision::Flag);
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test]
    async fn test_generator_escalation_with_mock() {
        let mock = MockGenerator::new(MockMode::LocaleTag);
        let store = Arc::new(Store::open_in_memory().await.unwrap());
        let generator: Arc<dyn Generator> = Arc::new(mock.clone());
        let pipeline = Pipeline::new(store, generator.clone(), PipelineConfig::default())
            .with_escalation(Arc::new(GeneratorEscalation::new(generator)));
        let segment = changed("row-1", "Attack the gate", "Attack that gate");
        let report = pipeline.run_change_segment(&segment, "de-DE").await.unwrap();

        // The mock resolver answers with the deterministic ladder
        let change = report.change.unwrap();
        assert_eq!(change.decision, ChangeDecision::Flag);
        assert_eq!(change.rule, ChangeRule::Escalated);
        assert_eq!(
            mock.calls(),
            vec![GenerationTask::ResolveChange, GenerationTask::Translate]
        );
    }

    async fn escalating_pipeline(
        resolver: MockGenerator,
        config: PipelineConfig,
    ) -> (Pipeline, MockGenerator) {
        let translator = MockGenerator::new(MockMode::LocaleTag);
        let store = Arc::new(Store::open_in_memory().await.unwrap());
        let pipeline = Pipeline::new(store, Arc::new(translator.clone()), config)
            .with_escalation(Arc::new(GeneratorEscalation::new(Arc::new(resolver))));
        (pipeline, translator)
    }

    #[tokio::test]
    async fn test_slow_escalation_is_held_to_generator_timeout() {
        let resolver = MockGenerator::with_delay(MockMode::LocaleTag, 4_000);
        let config = PipelineConfig {
            generator_timeout_secs: 1,
            generator_retries: 0,
            ..PipelineConfig::default()
        };
        let (pipeline, translator) = escalating_pipeline(resolver.clone(), config).await;
        let segment = changed("row-1", "Attack the gate", "Attack that gate");

        let started = std::time::Instant::now();
        let report = pipeline.run_change_segment(&segment, "de-DE").await.unwrap();
        let elapsed = started.elapsed();

        assert!(elapsed < std::time::Duration::from_secs(3), "took {elapsed:?}");
        let change = report.change.as_ref().unwrap();
        assert_eq!(change.decision, ChangeDecision::Flag);
        assert_eq!(change.rule, ChangeRule::Ambiguous);
        assert_eq!(report.disposition, RowDisposition::Done);
        assert_eq!(resolver.call_count(), 1);
        assert_eq!(translator.calls(), vec![GenerationTask::Translate]);
    }

    #[tokio::test]
    async fn test_transient_escalation_failure_is_retried() {
        let resolver = MockGenerator::new(MockMode::FailTimes(1));
        let (pipeline, _) = escalating_pipeline(resolver.clone(), PipelineConfig::default()).await;
        let segment = changed("row-1", "Attack the gate", "Attack that gate");
        let report = pipeline.run_change_segment(&segment, "de-DE").await.unwrap();
        assert_eq!(report.change.as_ref().unwrap().rule, ChangeRule::Escalated);
        assert_eq!(resolver.call_count(), 2);
    }

    #[tokio::test]
    async fn test_cancelled_change_batch_makes_no_escalation_call() {
        let resolver = MockGenerator::new(MockMode::LocaleTag);
        let (pipeline, translator) =
            escalating_pipeline(resolver.clone(), PipelineConfig::default()).await;
        pipeline.cancel_token().cancel();
        let segments = vec![changed("row-1", "Attack the gate", "Attack that gate")];
        let report = pipeline.run_change_batch(&segments, &de()).await;
        assert_eq!(report.cancelled, 1);
        assert_eq!(resolver.call_count(), 0);
        assert_eq!(translator.call_count(), 0);
        assert!(pipeline.store().change_decision("row-1", "de-DE").await.unwrap().is_none());
    }
}
