//! Property tests for the pipeline invariants.

use prompttrim::{
    inference::Backends,
    rules::{OutputFormat, RulesConfig, RulesEnforcer, TRUNCATION_MARKER},
    CompressionEngine, Provider, QualityController, TokenAccountant,
};
use proptest::prelude::*;

fn provider() -> impl Strategy<Value = Provider> {
    prop_oneof![
        Just(Provider::OpenAI),
        Just(Provider::Anthropic),
        Just(Provider::Grok),
        Just(Provider::Custom),
    ]
}

fn format() -> impl Strategy<Value = OutputFormat> {
    prop_oneof![
        Just(OutputFormat::Structured),
        Just(OutputFormat::List),
        Just(OutputFormat::FreeForm),
    ]
}

proptest! {
    #[test]
    fn compression_never_empties_text(
        text in "[a-zA-Z0-9][a-zA-Z0-9 ,.]{0,300}",
        ratio in 0.01f64..0.99,
        provider in provider(),
    ) {
        let engine = CompressionEngine::new(TokenAccountant::new());
        let result = tokio_test::block_on(engine.compress(&text, ratio, provider));

        prop_assert!(result.compressed_token_count >= 1, "empty compression for {:?}", text);
        prop_assert!(!result.compressed_text.trim().is_empty());
    }

    #[test]
    fn estimates_are_deterministic(text in "\\PC{0,300}", provider in provider()) {
        let accountant = TokenAccountant::new();
        prop_assert_eq!(
            accountant.estimate(&text, provider),
            accountant.estimate(&text, provider)
        );
    }

    #[test]
    fn quality_loop_is_bounded(
        text in "[a-z .]{0,400}",
        max_length in 1usize..120,
        target in 0.0f32..=1.0,
        max_iterations in 1usize..5,
    ) {
        let backends = Backends::lexical();
        let controller = QualityController::new(backends.reducer, backends.scorer)
            .with_max_iterations(max_iterations);
        let result = tokio_test::block_on(
            controller.summarize_with_quality_check(&text, max_length, target),
        );

        prop_assert!(result.iterations_used <= max_iterations);
        prop_assert!((0.0..=1.0).contains(&result.similarity_score));
    }

    #[test]
    fn short_text_passes_through(text in "[a-zA-Z .!?]{0,49}") {
        let backends = Backends::lexical();
        let controller = QualityController::new(backends.reducer, backends.scorer);
        let result = tokio_test::block_on(controller.summarize_with_quality_check(&text, 10, 0.9));

        prop_assert_eq!(result.summary_text, text);
        prop_assert_eq!(result.similarity_score, 1.0);
        prop_assert_eq!(result.iterations_used, 0);
    }

    #[test]
    fn enforcement_is_idempotent(
        text in "[a-zA-Z0-9@.{}\\- \n]{0,300}",
        format in format(),
        provider in provider(),
    ) {
        let enforcer = RulesEnforcer::default();
        let config = RulesConfig::new(format, 10_000, true).unwrap();

        let once = enforcer.enforce(&text, "gpt-4o-mini", provider, &config);
        let twice = enforcer.enforce(&once, "gpt-4o-mini", provider, &config);
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn exact_truncation_respects_budget(
        words in prop::collection::vec(
            prop_oneof![
                Just("the"), Just("quick"), Just("brown"), Just("fox"),
                Just("jumps"), Just("over"), Just("lazy"), Just("dog"),
            ],
            0..40,
        ),
    ) {
        let text = words.join(" ");
        let accountant = TokenAccountant::new();
        let enforcer = RulesEnforcer::new(accountant);
        let config = RulesConfig::new(OutputFormat::FreeForm, 5, false).unwrap();

        let out = enforcer.enforce(&text, "gpt-4o-mini", Provider::OpenAI, &config);
        let original = accountant.count(&text, Provider::OpenAI, "gpt-4o-mini").unwrap();

        if original > 5 {
            prop_assert!(out.ends_with(TRUNCATION_MARKER));
            let body = &out[..out.len() - TRUNCATION_MARKER.len()];
            let kept = accountant.count(body, Provider::OpenAI, "gpt-4o-mini").unwrap();
            prop_assert!(kept <= 5, "kept {} tokens", kept);
        } else {
            prop_assert_eq!(out, text);
        }
    }
}
