//! Integration tests for the logging system

use bridge_traits::LogLevel;
use core_runtime::logging::{init_logging, strip_path, LogFormat, LoggingConfig};

#[test]
fn test_init_logging_once() {
    let config = LoggingConfig::default()
        .with_format(LogFormat::Compact)
        .with_level(LogLevel::Warn)
        .with_spans(false);

    assert!(init_logging(config.clone()).is_ok());

    // The global subscriber can only be installed once per process
    let err = init_logging(config).unwrap_err();
    assert!(err.to_string().contains("subscriber already installed"));
}

#[test]
fn test_path_stripping_for_media_files() {
    assert_eq!(strip_path("/mnt/media/Music/Artist/track.flac"), "track.flac");
    assert_eq!(strip_path("D:\\Videos\\holiday.mp4"), "holiday.mp4");
    assert_eq!(strip_path(""), "");
}

#[test]
fn test_format_selection() {
    #[cfg(debug_assertions)]
    assert_eq!(LoggingConfig::default().format, LogFormat::Pretty);

    #[cfg(not(debug_assertions))]
    assert_eq!(LoggingConfig::default().format, LogFormat::Json);
}

#[test]
fn test_config_chaining() {
    let config = LoggingConfig::default()
        .with_format(LogFormat::Json)
        .with_level(LogLevel::Trace)
        .with_filter("core_library=debug,sqlx=info")
        .with_target(false)
        .with_thread_info(true);

    assert_eq!(config.format, LogFormat::Json);
    assert_eq!(config.level, LogLevel::Trace);
    assert_eq!(config.filter.as_deref(), Some("core_library=debug,sqlx=info"));
    assert!(!config.display_target);
    assert!(config.display_thread_info);
}
