//! Properties that hold for every store and query

use exemplar_memory::similarity::{cosine_similarity, euclidean_distance};
use exemplar_memory::{
    ClassifierOutput, ConfidenceCalibration, ConfidenceEstimator, CorrectionStatus,
    DecisionFusion, EngineConfig, Exemplar, ExemplarRef, FusionConfig, InsertionPolicy,
    LabelScore, LabelStatistics, MemoryAnalyzer, RationaleTag, SimilarityEngine, ThresholdPolicy,
};
use proptest::prelude::*;

const LABELS: [&str; 4] = ["Pug", "Beagle", "Basset Hound", "Samoyed"];

fn vector(dim: usize) -> impl Strategy<Value = Vec<f32>> {
    prop::collection::vec(-50.0_f32..50.0, dim)
}

fn store(dim: usize) -> impl Strategy<Value = Vec<(usize, Vec<f32>)>> {
    prop::collection::vec((0..LABELS.len(), vector(dim)), 0..12)
}

fn exemplars(records: &[(usize, Vec<f32>)]) -> Vec<Exemplar> {
    records
        .iter()
        .map(|(label, embedding)| {
            Exemplar::builder()
                .label(LABELS[*label])
                .embedding(embedding.clone())
                .build()
                .unwrap()
        })
        .collect()
}

proptest! {
    #[test]
    fn euclidean_to_self_is_zero(a in vector(8)) {
        prop_assert_eq!(euclidean_distance(&a, &a).unwrap(), 0.0);
    }

    #[test]
    fn cosine_to_self_is_one(a in vector(8)) {
        prop_assume!(a.iter().any(|v| v.abs() > 1e-3));
        let cos = cosine_similarity(&a, &a).unwrap();
        prop_assert!((cos - 1.0).abs() < 1e-4, "cos(a, a) = {}", cos);
    }

    #[test]
    fn cosine_with_zero_vector_is_zero(a in vector(8)) {
        prop_assert_eq!(cosine_similarity(&a, &[0.0; 8]).unwrap(), 0.0);
    }

    #[test]
    fn combined_stays_in_unit_range(a in vector(6), b in vector(6)) {
        let sim = SimilarityEngine::default().measure(&a, &b).unwrap();
        prop_assert!((0.0..=1.0).contains(&sim.combined));
        prop_assert!((-1.0..=1.0).contains(&sim.cosine));
    }

    /// A query inside the duplicate radius of some exemplar always resolves
    /// to memory, whatever the classifier says
    #[test]
    fn exact_duplicate_always_wins(
        records in store(6),
        target in vector(6),
        target_label in 0..LABELS.len(),
        nudge in -0.5_f32..0.5,
        predicted in 0..LABELS.len(),
        confidence in 0.0_f32..=1.0,
    ) {
        let mut records = records;
        records.push((target_label, target.clone()));
        let exemplars = exemplars(&records);
        let query: Vec<f32> = target.iter().map(|v| v + nudge).collect();

        let config = EngineConfig::default();
        let policy = &config.thresholds;
        let similarity = SimilarityEngine::default();
        let stats = MemoryAnalyzer::new(policy, &similarity).analyze(&query, &exemplars).unwrap();
        let candidates = ConfidenceEstimator::new(policy, &config.calibration).score_all(stats);

        let prediction = ClassifierOutput::new(
            query,
            vec![LabelScore::new(LABELS[predicted], confidence)],
        ).unwrap();
        let decision = DecisionFusion::new(policy, &config.fusion).decide(&prediction, &candidates);

        prop_assert_eq!(decision.rationale_tag(), RationaleTag::MemoryExactDuplicate);
        prop_assert!(decision.used_memory());
        let evidence = decision.memory_evidence().unwrap();
        prop_assert!(evidence.best_euclidean < policy.exact_duplicate_euclidean);
        prop_assert_eq!(decision.final_label(), evidence.label.as_str());
    }

    #[test]
    fn confidence_stays_within_clamp(
        count in 1_usize..20,
        best_e in 0.0_f32..40.0,
        best_cos in -1.0_f32..=1.0,
        max_combined in 0.0_f32..=1.0,
        std_e in 0.0_f32..10.0,
    ) {
        let policy = ThresholdPolicy::default();
        let calibration = ConfidenceCalibration::default();
        let stats = LabelStatistics {
            example_count: count,
            best_euclidean: best_e,
            best_cosine: best_cos,
            mean_euclidean: best_e,
            std_euclidean: std_e,
            mean_combined: max_combined,
            max_combined,
            best_exemplar: ExemplarRef { index: 0, source_reference: String::new() },
        };
        let estimator = ConfidenceEstimator::new(&policy, &calibration);

        let confidence = estimator.estimate("Pug", &stats);
        prop_assert!(confidence >= calibration.min_confidence);
        prop_assert!(confidence <= 1.0);

        let score = estimator.memory_score("Pug", &stats);
        prop_assert!((0.0..=100.0).contains(&score));
    }

    #[test]
    fn agreement_never_exceeds_cap(
        records in store(4),
        predicted in 0..LABELS.len(),
        confidence in 0.0_f32..=1.0,
        query in vector(4),
    ) {
        let exemplars = exemplars(&records);
        let config = EngineConfig::default();
        let policy = &config.thresholds;
        let similarity = SimilarityEngine::default();
        let stats = MemoryAnalyzer::new(policy, &similarity).analyze(&query, &exemplars).unwrap();
        let candidates = ConfidenceEstimator::new(policy, &config.calibration).score_all(stats);

        let prediction = ClassifierOutput::new(
            query,
            vec![LabelScore::new(LABELS[predicted], confidence)],
        ).unwrap();
        let fusion = FusionConfig::default();
        let decision = DecisionFusion::new(policy, &fusion).decide(&prediction, &candidates);

        prop_assert!((0.0..=1.0).contains(&decision.final_confidence()));
        if decision.rationale_tag() == RationaleTag::AgreementBoost {
            prop_assert!(decision.final_confidence() <= fusion.agreement_cap);
        }
        prop_assert!(decision.top_alternatives().len() <= fusion.max_alternatives);
        prop_assert!(decision
            .top_alternatives()
            .iter()
            .all(|alt| alt.label != decision.final_label()));
    }

    #[test]
    fn repeated_correction_is_skipped(
        records in store(5),
        embedding in vector(5),
        label in 0..LABELS.len(),
    ) {
        let mut exemplars = exemplars(&records);
        let policy = ThresholdPolicy::default();
        let insertion = InsertionPolicy::new(&policy);

        insertion.apply(&mut exemplars, embedding.clone(), LABELS[label], "a.jpg").unwrap();
        let size = exemplars.len();
        let (outcome, changed) = insertion
            .apply(&mut exemplars, embedding, LABELS[label], "a.jpg")
            .unwrap();

        prop_assert_eq!(outcome.status, CorrectionStatus::Skipped);
        prop_assert!(!changed);
        prop_assert_eq!(exemplars.len(), size);
    }
}
