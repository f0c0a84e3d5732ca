//! The shipped configuration file must stay in sync with the built-in defaults.

use abs_plqy::config::Settings;
use std::path::Path;

#[test]
fn test_shipped_config_matches_defaults() {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/abs_plqy.toml");
    let settings = Settings::load_from(&path).unwrap();
    assert!(settings.validate().is_ok());
    assert_eq!(settings, Settings::default());
}
