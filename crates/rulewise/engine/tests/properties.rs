use std::sync::Arc;

use proptest::prelude::*;
use serde_json::{json, Value};

use rulewise_engine::{
    Collaborators, DetectionOptions, EngineConfig, InMemoryHistorySource, InMemoryRuleStore,
    PatternIntelligenceEngine, RuleStore,
};
use rulewise_types::{
    Constraints, OptimizationStatus, Parameters, Pattern, PerformanceSample, RuleConfiguration,
    TargetMetric,
};

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn record_strategy() -> impl Strategy<Value = Value> {
    (0u32..1000, 0.0f64..100.0, prop::sample::select(vec!["login", "search", "logout"]))
        .prop_map(|(id, amount, action)| {
            json!({"id": id, "amount": amount, "action": action, "note": format!("{} request", action)})
        })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]

    #[test]
    fn below_threshold_history_never_touches_the_store(samples in 0usize..100) {
        let rt = runtime();
        let (status, version) = rt.block_on(async {
            let store = Arc::new(InMemoryRuleStore::new());
            let history = Arc::new(InMemoryHistorySource::new());
            let mut params = Parameters::new();
            params.insert("threshold".into(), 0.5);
            store.insert(RuleConfiguration::new("r", params.clone())).await;
            history
                .extend("r", (0..samples).map(|_| PerformanceSample::new(params.clone())))
                .await;

            let engine = PatternIntelligenceEngine::new(
                EngineConfig::default(),
                Collaborators::new(store.clone(), history),
            )
            .unwrap();
            let outcome = engine
                .optimize_rule_parameters("r", TargetMetric::OverallPerformance, Constraints::default())
                .await;
            (outcome.status, store.get_configuration("r").await.unwrap().version)
        });
        prop_assert_eq!(status, OptimizationStatus::InsufficientData);
        prop_assert_eq!(version, 1);
    }

    #[test]
    fn detection_is_deterministic_and_bounded(
        records in prop::collection::vec(record_strategy(), 10..40)
    ) {
        let rt = runtime();
        let (first, second) = rt.block_on(async {
            let engine =
                PatternIntelligenceEngine::new(EngineConfig::default(), Collaborators::in_memory())
                    .unwrap();
            let a = engine
                .detect_patterns(records.clone(), &[], DetectionOptions::uncached())
                .await
                .unwrap();
            let b = engine
                .detect_patterns(records, &[], DetectionOptions::uncached())
                .await
                .unwrap();
            (a.patterns, b.patterns)
        });

        let signatures = |ps: &[Pattern]| ps.iter().map(Pattern::signature).collect::<Vec<_>>();
        prop_assert_eq!(signatures(&first), signatures(&second));
        for p in &first {
            prop_assert!((0.7..=1.0).contains(&p.confidence));
            prop_assert!((0.0..=1.0).contains(&p.statistical_significance));
        }
    }
}
