#![allow(dead_code)]

use std::sync::Once;
use std::time::Duration;

use sombra_shm::storage::{Engine, EngineOptions};
use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("sombra_shm=warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// Small segment pair in a private temp directory.
pub fn options(dir: &TempDir) -> EngineOptions {
    EngineOptions::new(dir.path())
        .max_rows(1024)
        .hash_buckets(61)
        .lock_timeout(Duration::from_millis(500))
}

pub fn engine() -> (TempDir, Engine) {
    init_tracing();
    let dir = tempfile::tempdir().expect("tempdir");
    let engine = Engine::create(options(&dir)).expect("create engine");
    (dir, engine)
}
