//! Standard location lookup through the user config directory
//!
//! Kept in its own test binary because it changes the process environment.
//!
//! Run with: `cargo test -p hidkey --test config_default_path`

#![cfg(target_os = "linux")]

use hidkey::Config;
use std::fs;
use tempfile::TempDir;

#[test]
fn invalid_user_config_is_not_replaced_by_defaults() {
    let dir = TempDir::new().unwrap();
    // Only test in this binary, nothing reads the environment concurrently
    unsafe { std::env::set_var("XDG_CONFIG_HOME", dir.path()) };

    let path = Config::default_path();
    assert!(path.starts_with(dir.path()));
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, "[timing]\npoll_interval_ms = \"fast\"\n").unwrap();

    assert!(Config::load_or_default().is_err());

    fs::write(&path, "[input]\nmode = \"cached\"\n").unwrap();
    let config = Config::load_or_default().unwrap();
    assert_eq!(config.input.mode, protocol::InputMode::Cached);
}
