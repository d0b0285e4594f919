use pdm_config::{AppConfig, MAX_CONNECT_TIMEOUT_MS};

// 环境变量是进程级状态，所有断言放在同一个测试里顺序执行。
#[test]
fn load_config_from_env() {
    // Rust 2024 中 set_var 需要显式标注 unsafe（测试进程内可控）。
    unsafe {
        std::env::remove_var("PDM_CONNECTORS_FILE");
    }
    assert!(AppConfig::from_env().is_err());

    unsafe {
        std::env::set_var("PDM_CONNECTORS_FILE", "/etc/pdm/connectors.json");
        std::env::set_var("PDM_CONNECT_TIMEOUT_MS", "30000");
        std::env::set_var("PDM_BATCH_SIZE", "16");
        std::env::set_var("PDM_SINK_PATH", "");
    }
    let config = AppConfig::from_env().expect("config");
    assert_eq!(
        config.connectors_file.to_str(),
        Some("/etc/pdm/connectors.json")
    );
    assert_eq!(config.connect_timeout_ms, MAX_CONNECT_TIMEOUT_MS);
    assert_eq!(config.batch_size, 16);
    assert_eq!(config.shutdown_timeout_ms, 2_000);
    assert_eq!(config.rolling_window, 5);
    assert!(config.sink_path.is_none());

    unsafe {
        std::env::set_var("PDM_BATCH_SIZE", "0");
    }
    assert!(AppConfig::from_env().is_err());
    unsafe {
        std::env::remove_var("PDM_BATCH_SIZE");
        std::env::remove_var("PDM_CONNECT_TIMEOUT_MS");
    }
}
