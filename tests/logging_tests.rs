//! One test per binary: the global subscriber can only be installed once.

use danci_tutor_core::config::LoggingConfig;
use danci_tutor_core::logging::{init_tracing, LoggingError, LOG_FILE_PREFIX};

#[test]
fn file_logging_installs_once_and_writes_daily_file() {
    let dir = tempfile::tempdir().unwrap();
    let config = LoggingConfig {
        level: "danci_tutor_core=debug,info".to_string(),
        file_logs: true,
        log_dir: dir.path().join("logs").to_string_lossy().into_owned(),
    };

    let guard = init_tracing(&config).unwrap().expect("file logging returns a guard");
    assert_eq!(guard.directory(), dir.path().join("logs"));

    tracing::info!(learner_id = "u1", "practice session started");

    let err = init_tracing(&LoggingConfig::default()).unwrap_err();
    assert!(matches!(err, LoggingError::AlreadyInstalled(_)));

    drop(guard);

    let files: Vec<_> = std::fs::read_dir(dir.path().join("logs"))
        .unwrap()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_name().to_string_lossy().starts_with(LOG_FILE_PREFIX))
        .collect();
    assert_eq!(files.len(), 1);

    let content = std::fs::read_to_string(files[0].path()).unwrap();
    assert!(content.contains("practice session started"));
    assert!(content.contains("file logging enabled"));
}
