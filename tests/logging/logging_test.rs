//! Subscriber setup.

use bamboo_entrypoint::config::{LogFormat, LoggingConfig};
use bamboo_entrypoint::logging;

#[test]
fn verbose_selects_debug() {
    assert_eq!(logging::default_directive(true), "debug");
    assert_eq!(logging::default_directive(false), "info");
}

#[test]
fn second_init_is_rejected() {
    let config = LoggingConfig {
        verbose: false,
        format: LogFormat::Json,
    };
    let _first = logging::init(&config);
    assert!(logging::init(&config).is_err());
}
