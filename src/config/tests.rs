use super::load_config;
use super::settings::Settings;
use serial_test::serial;
use std::env;
use std::fs;
use tempfile::TempDir;

#[test]
fn test_default_settings() {
    let settings = Settings::default();
    assert_eq!(settings.server.host, "127.0.0.1");
    assert_eq!(settings.server.port, 5000);
    assert_eq!(settings.broker.max_connections, 1000);
    assert_eq!(settings.broker.max_frame_len, 1024 * 1024);
    assert_eq!(settings.client.listen_port, 5500);
    assert_eq!(settings.client.ack_timeout_ms, None);
    assert_eq!(settings.logging.level, "info");
}

#[test]
#[serial]
fn load_config_from_file_overrides_defaults() {
    // load_config reads config/default.* relative to the working directory.
    let tmp = TempDir::new().expect("create tempdir");
    let orig = env::current_dir().expect("current_dir");
    env::set_current_dir(tmp.path()).expect("set current dir");

    fs::create_dir_all("config").expect("create config dir");
    let toml = r#"
        [server]
        host = "0.0.0.0"
        port = 9000

        [broker]
        max_connections = 10
        transform_timeout_ms = 250

        [client]
        ack_timeout_ms = 1500
    "#;
    fs::write("config/default.toml", toml).expect("write config file");

    let cfg = load_config();
    env::set_current_dir(orig).expect("restore cwd");

    let cfg = cfg.expect("load_config failed");
    assert_eq!(cfg.server.host, "0.0.0.0");
    assert_eq!(cfg.server.port, 9000);
    assert_eq!(cfg.broker.max_connections, 10);
    assert_eq!(cfg.broker.transform_timeout_ms, 250);
    // untouched keys keep their defaults
    assert_eq!(cfg.broker.connect_timeout_ms, 2000);
    assert_eq!(cfg.client.ack_timeout_ms, Some(1500));
    assert_eq!(cfg.client.listen_port, 5500);
}

#[test]
#[serial]
fn load_config_from_environment() {
    let tmp = TempDir::new().expect("create tempdir");
    let orig = env::current_dir().expect("current_dir");
    env::set_current_dir(tmp.path()).expect("set current dir");

    let cfg = temp_env::with_vars(
        [
            ("MYCELIA_SERVER__PORT", Some("7100")),
            ("MYCELIA_CLIENT__BROKER_HOST", Some("10.0.0.5")),
            ("MYCELIA_LOGGING__LEVEL", Some("debug")),
        ],
        load_config,
    );
    env::set_current_dir(orig).expect("restore cwd");

    let cfg = cfg.expect("load_config failed");
    assert_eq!(cfg.server.port, 7100);
    assert_eq!(cfg.client.broker_host, "10.0.0.5");
    assert_eq!(cfg.logging.level, "debug");
    assert_eq!(cfg.server.host, "127.0.0.1");
}
