use crate::engine::EngineConfig;
use tracing_subscriber::EnvFilter;

/// Initialize the tracing subscriber from `RUST_LOG`.
/// Safe to call repeatedly — only the first call takes effect.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Config with a buffer large enough that tests never flush.
pub fn memtable_only_config() -> EngineConfig {
    init_tracing();
    EngineConfig {
        max_memtable_size: 64 * 1024 * 1024,
        ..EngineConfig::default()
    }
}

/// Config that flushes after every single write, so each mutation lands
/// in its own SSTable and compaction triggers constantly.
pub fn flush_every_write_config() -> EngineConfig {
    init_tracing();
    EngineConfig {
        max_memtable_size: 1,
        ..EngineConfig::default()
    }
}

/// Small buffer that needs a handful of writes to trigger a flush.
pub fn small_buffer_config() -> EngineConfig {
    init_tracing();
    EngineConfig {
        max_memtable_size: 4096,
        ..EngineConfig::default()
    }
}
