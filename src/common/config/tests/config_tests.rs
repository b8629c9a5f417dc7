//! Unit tests for common-config crate

use common_config::{
    BreakerConfig, BreakerKind, ExecutionConfig, QuarryConfig, DEFAULT_MAX_ITERATIONS,
    DEFAULT_PAGE_SIZE,
};

#[test]
fn test_quarry_config_default() {
    let config = QuarryConfig::default();

    assert_eq!(config.execution.page_size, DEFAULT_PAGE_SIZE);
    assert_eq!(config.execution.parallelism, None);
    assert_eq!(
        config.execution.max_iterations_per_slice,
        DEFAULT_MAX_ITERATIONS
    );
    assert!(config.execution.collect_metrics);

    assert_eq!(config.breaker.kind, BreakerKind::Unlimited);
    assert_eq!(config.breaker.limit_bytes, None);
    assert_eq!(config.breaker.effective_limit(), 0);
}

#[test]
fn test_limited_breaker() {
    let breaker = BreakerConfig::limited(1024);
    assert_eq!(breaker.kind, BreakerKind::Limited);
    assert_eq!(breaker.effective_limit(), 1024);

    // A limit without the limited kind is ignored
    let ignored = BreakerConfig {
        kind: BreakerKind::Unlimited,
        limit_bytes: Some(1024),
    };
    assert_eq!(ignored.effective_limit(), 0);
}

#[test]
fn test_config_json_roundtrip() {
    let mut config = QuarryConfig::default();
    config.execution.page_size = 128;
    config.execution.parallelism = Some(4);
    config.breaker = BreakerConfig::limited(1024 * 1024 * 1024);

    let json = config.to_json_string().unwrap();
    assert!(json.contains("\"limited\""));
    assert!(json.contains("1073741824"));

    let parsed = QuarryConfig::from_json_str(&json).unwrap();
    assert_eq!(parsed, config);
}

#[test]
fn test_config_partial_json() {
    let json = r#"{
        "execution": { "page_size": 512 },
        "breaker": {}
    }"#;

    let config = QuarryConfig::from_json_str(json).unwrap();
    assert_eq!(config.execution.page_size, 512);
    // Missing fields should use defaults
    assert_eq!(config.execution.parallelism, None);
    assert!(config.execution.collect_metrics);
    assert_eq!(config.breaker.kind, BreakerKind::Unlimited);
}

#[test]
fn test_config_empty_json() {
    let config = QuarryConfig::from_json_str("{}").unwrap();
    assert_eq!(config, QuarryConfig::default());
}

#[test]
fn test_invalid_breaker_kind() {
    let json = r#"{ "breaker": { "kind": "hierarchy" } }"#;
    let result = QuarryConfig::from_json_str(json);
    assert!(result.is_err());
}

#[test]
fn test_limited_breaker_requires_budget() {
    let json = r#"{ "breaker": { "kind": "limited" } }"#;
    let err = QuarryConfig::from_json_str(json).unwrap_err();
    assert!(err.to_string().contains("limit_bytes"));

    let zero = r#"{ "breaker": { "kind": "limited", "limit_bytes": 0 } }"#;
    assert!(QuarryConfig::from_json_str(zero).is_err());

    let missing = BreakerConfig {
        kind: BreakerKind::Limited,
        limit_bytes: None,
    };
    assert!(missing.validate().is_err());
    assert!(BreakerConfig::limited(1).validate().is_ok());
    assert!(BreakerConfig::default().validate().is_ok());
}

#[test]
fn test_invalid_page_size() {
    let json = r#"{ "execution": { "page_size": -1 } }"#;
    assert!(QuarryConfig::from_json_str(json).is_err());
}

#[test]
fn test_config_toml_serialization() {
    let mut config = QuarryConfig::default();
    config.breaker = BreakerConfig::limited(4096);

    let toml_str = toml::to_string_pretty(&config).unwrap();
    assert!(toml_str.contains("[execution]"));
    assert!(toml_str.contains("[breaker]"));
    assert!(toml_str.contains("kind = \"limited\""));

    let deserialized: QuarryConfig = toml::from_str(&toml_str).unwrap();
    assert_eq!(deserialized.breaker.effective_limit(), 4096);
}

#[test]
fn test_execution_config_debug_format() {
    let config = ExecutionConfig {
        page_size: 16,
        parallelism: Some(3),
        max_iterations_per_slice: 7,
        collect_metrics: false,
    };
    let debug_str = format!("{:?}", config);
    assert!(debug_str.contains("16"));
    assert!(debug_str.contains("Some(3)"));
    assert!(debug_str.contains("false"));
}
