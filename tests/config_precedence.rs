//! Settings precedence across file, environment, and CLI layers.

use attesta::config::{self, CliArgs};
use serial_test::serial;

fn set_env(key: &str, value: &str) {
    // Safety: tests touching process environment are serialized.
    unsafe { std::env::set_var(key, value) };
}

fn remove_env(key: &str) {
    // Safety: tests touching process environment are serialized.
    unsafe { std::env::remove_var(key) };
}

#[test]
#[serial]
fn environment_variables_override_file_settings() {
    set_env("ATTESTA__SERVER__PORT", "4567");
    set_env("ATTESTA__RENDER__GATE_CAPACITY", "9");

    let cli = CliArgs {
        config_file: None,
        command: None,
    };
    let settings = config::load(&cli).expect("settings load");

    remove_env("ATTESTA__SERVER__PORT");
    remove_env("ATTESTA__RENDER__GATE_CAPACITY");

    assert_eq!(settings.server.addr.port(), 4567);
    assert_eq!(settings.render.gate_capacity.get(), 9);
}

#[test]
#[serial]
fn defaults_apply_when_no_layer_sets_a_key() {
    remove_env("ATTESTA__SERVER__PORT");

    let cli = CliArgs {
        config_file: None,
        command: None,
    };
    let settings = config::load(&cli).expect("settings load");

    assert_eq!(settings.server.addr.port(), 3000);
    assert!(!settings.maintenance.enabled);
}
