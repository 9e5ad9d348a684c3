use std::time::Duration;

use feedcart_core::error::BuildError;
use feedcart_core::{ManagerCfg, WeightManager};
use rstest::rstest;

#[rstest]
fn oversized_cache_ttl_yields_typed_build_error() {
    let err = WeightManager::builder()
        .with_config(ManagerCfg {
            cache_ttl: Duration::from_secs(61),
            ..ManagerCfg::default()
        })
        .build()
        .expect_err("should reject cache ttl");

    match err.downcast_ref::<BuildError>() {
        Some(BuildError::InvalidConfig(msg)) => assert!(msg.contains("cache ttl")),
        other => panic!("expected InvalidConfig, got: {other:?}"),
    }
}

#[test]
fn config_section_converts_into_manager_cfg() {
    let cfg = feedcart_config::load_toml("[manager]\ncache_ms = 40\nerror_threshold = 1").unwrap();
    let m = WeightManager::builder()
        .with_config(&cfg.manager)
        .build()
        .unwrap();
    assert_eq!(m.cfg().cache_ttl, Duration::from_millis(40));
    assert_eq!(m.cfg().error_threshold, 1);
}
