//! Configuration and value (de)serialization.

#![cfg(feature = "serde")]

use std::net::Ipv4Addr;
use std::time::Duration;

use fins_driver::{
    DataType, MemoryArea, OptimizerConfig, ResponseFormat, SessionConfig, Value,
    DEFAULT_MAX_BLOCK_WORDS,
};

#[test]
fn optimizer_config_fills_defaults() {
    let config: OptimizerConfig = serde_json::from_str(r#"{ "min_efficiency": 0.5 }"#).unwrap();
    assert_eq!(config.min_efficiency, 0.5);
    assert_eq!(config.max_block_words, DEFAULT_MAX_BLOCK_WORDS);
    assert!(config.validate().is_ok());
}

#[test]
fn session_config_survives_json() {
    let config = SessionConfig::new(Ipv4Addr::new(10, 0, 0, 7))
        .with_port(9601)
        .with_receive_timeout(Duration::from_millis(750))
        .with_client_node(0x21)
        .with_response_format(ResponseFormat::CommandEcho);

    let json = serde_json::to_string(&config).unwrap();
    assert!(json.contains("10.0.0.7:9601"));
    assert!(json.contains("CommandEcho"));

    let back: SessionConfig = serde_json::from_str(&json).unwrap();
    assert_eq!(back, config);
}

#[test]
fn values_and_types_serialize_by_name() {
    assert_eq!(serde_json::to_string(&MemoryArea::DM).unwrap(), r#""DM""#);
    assert_eq!(
        serde_json::to_string(&DataType::String(4)).unwrap(),
        r#"{"String":4}"#
    );
    assert_eq!(
        serde_json::to_string(&Value::Int16(-3)).unwrap(),
        r#"{"Int16":-3}"#
    );
}
