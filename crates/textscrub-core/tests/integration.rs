use textscrub_core::{
    redact, Config, DetectionEngine, Entity, EntityType, ExternalMode, Layer, RedactionMode,
    RedactionOptions,
};

fn offline_config() -> Config {
    let mut config = Config::default();
    config.external.mode = ExternalMode::Disabled;
    config
}

#[tokio::test]
async fn test_detect_and_redact_via_public_api() {
    let engine = DetectionEngine::with_available_memory(offline_config(), 16_000).unwrap();

    let text = "Ticket from john.doe@example.com, callback 555-123-4567";
    let result = engine.detect(text).await.unwrap();
    assert_eq!(result.entities.len(), 2);
    assert!(result.layers_used.contains(&Layer::Pattern));

    let (clean, report) = redact(text, &result.entities, &RedactionOptions::default());
    assert_eq!(clean, "Ticket from [EMAIL], callback [PHONE]");
    assert_eq!(report.replacements.len(), 2);
    assert_eq!(report.mode, RedactionMode::Mask);
}

#[tokio::test]
async fn test_result_serializes_to_json() {
    let engine = DetectionEngine::with_available_memory(offline_config(), 16_000).unwrap();
    let result = engine.detect("SSN 123-45-6789").await.unwrap();

    let json = serde_json::to_string(&result).unwrap();
    assert!(json.contains("\"ssn\""));
    assert!(json.contains("\"fallback_used\":false"));

    let parsed: textscrub_core::DetectionResult = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed.entities.len(), 1);
}

#[test]
fn test_module_exports() {
    // The surface the chat-send and document-upload pipelines consume.
    let config = Config::default();
    assert!(config.validate().is_ok());

    let _battery = textscrub_core::PatternLayer::new().unwrap();
    let _model = textscrub_core::ContextModelLayer::new(None);
    let _filter = textscrub_core::ExclusionFilter::empty();
    let _aggregator = textscrub_core::Aggregator::new(0.5, 0.1);

    let entity = Entity::new(EntityType::Email, 0, 7, "a@b.com", 0.95, Layer::Pattern);
    assert_eq!(entity.entity_type.mask_token(), "[EMAIL]");
}

#[tokio::test]
async fn test_settings_snapshot_per_call() {
    let engine = DetectionEngine::with_available_memory(offline_config(), 16_000).unwrap();

    let before = engine.config_snapshot();
    assert!(before.detection.enabled_layers.contains(&Layer::ContextModel));

    let mut updated = offline_config();
    updated.detection.enabled_layers.remove(&Layer::ContextModel);
    engine.update_config(updated);

    // The old snapshot is untouched; new calls see the new settings.
    assert!(before.detection.enabled_layers.contains(&Layer::ContextModel));
    let result = engine.detect("ask John Smith").await.unwrap();
    assert!(result.entities.is_empty());
    assert!(!result.layers_used.contains(&Layer::ContextModel));
}
