use sat_llc::{ArqConfig, ConfigError, LlcConfig, LlcError};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

fn temp_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("sat-llc-{}-{name}.json", std::process::id()))
}

#[test]
fn test_defaults() {
    let config = LlcConfig::default();
    assert_eq!(config.num_flows, 4);
    assert!(!config.tx_arq_enabled);
    assert!(!config.rx_arq_enabled);
    assert_eq!(config.queue_max_bytes, None);

    let arq = ArqConfig::default();
    assert_eq!(arq.window_size, 10);
    assert_eq!(arq.max_retransmissions, 2);
    assert_eq!(arq.retransmission_timer(), Duration::from_millis(600));
    assert_eq!(arq.rx_waiting_time(), Duration::from_millis(1800));
    assert!(arq.report_losses);
    assert!(config.validate().is_ok());
}

#[test]
fn test_validation() {
    let mut config = LlcConfig::default();
    config.arq.window_size = 0;
    assert!(matches!(config.validate(), Err(LlcError::InvalidConfig(_))));
    config.arq.window_size = 65;
    assert!(matches!(config.validate(), Err(LlcError::InvalidConfig(_))));
    config.arq.window_size = 64;
    assert!(config.validate().is_ok());

    config.num_flows = 1;
    assert!(matches!(config.validate(), Err(LlcError::InvalidConfig(_))));
    config.num_flows = 2;
    config.arq.ack_every = 0;
    assert!(matches!(config.validate(), Err(LlcError::InvalidConfig(_))));
    config.arq.ack_every = 1;
    assert!(config.validate().is_ok());
}

#[test]
fn test_receiver_must_outwait_retransmissions() {
    let mut arq = ArqConfig {
        max_retransmissions: 5,
        ..ArqConfig::default()
    };
    assert!(matches!(arq.validate(), Err(LlcError::InvalidConfig(_))));
    arq.rx_waiting_time_ms = 3599;
    assert!(matches!(arq.validate(), Err(LlcError::InvalidConfig(_))));
    arq.rx_waiting_time_ms = 3600;
    assert!(arq.validate().is_ok());

    arq.max_retransmissions = 0;
    arq.rx_waiting_time_ms = 600;
    assert!(arq.validate().is_ok());
}

#[test]
fn test_save_and_load() {
    let path = temp_path("roundtrip");
    let mut config = LlcConfig::default();
    config.tx_arq_enabled = true;
    config.arq.window_size = 20;
    config.queue_max_bytes = Some(1 << 20);

    config.save(&path).unwrap();
    let loaded = LlcConfig::load(&path).unwrap();
    fs::remove_file(&path).unwrap();
    assert_eq!(loaded, config);
}

#[test]
fn test_missing_fields_take_defaults() {
    let path = temp_path("partial");
    fs::write(&path, r#"{ "rx_arq_enabled": true, "arq": { "window_size": 20 } }"#).unwrap();
    let loaded = LlcConfig::load(&path).unwrap();
    fs::remove_file(&path).unwrap();

    assert!(loaded.rx_arq_enabled);
    assert!(!loaded.tx_arq_enabled);
    assert_eq!(loaded.arq.window_size, 20);
    assert_eq!(loaded.arq.max_retransmissions, 2);
    assert_eq!(loaded.num_flows, 4);
}

#[test]
fn test_load_errors() {
    let missing = temp_path("missing");
    assert!(matches!(LlcConfig::load(&missing), Err(ConfigError::Io(_))));

    let path = temp_path("garbage");
    fs::write(&path, "{ not json").unwrap();
    assert!(matches!(LlcConfig::load(&path), Err(ConfigError::Json(_))));

    fs::write(&path, r#"{ "num_flows": 1 }"#).unwrap();
    assert!(matches!(
        LlcConfig::load(&path),
        Err(ConfigError::Invalid(LlcError::InvalidConfig(_)))
    ));
    fs::remove_file(&path).unwrap();
}
