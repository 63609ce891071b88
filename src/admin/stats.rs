use std::fs;

use serde::Serialize;

use crate::admin::{AdminError, Result};
use crate::storage::{Engine, EngineOptions, Geometry};

#[derive(Debug, Clone, Serialize)]
pub struct StatsReport {
    pub files: SegmentFiles,
    pub geometry: Geometry,
    pub usage: UsageSection,
    pub lock: LockSection,
}

#[derive(Debug, Clone, Serialize)]
pub struct SegmentFiles {
    pub offsets_path: String,
    pub offsets_size_bytes: u64,
    pub data_path: String,
    pub data_size_bytes: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct UsageSection {
    pub rows_allocated: u64,
    pub live_rows: u64,
    pub heap_words_used: u64,
    pub heap_fill_ratio: f64,
    pub overflow_entries_used: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LockSection {
    pub timeout_ms: u64,
}

/// Attaches to the segments named by `opts` and reports their usage.
pub fn stats(opts: &EngineOptions) -> Result<StatsReport> {
    let offsets_path = opts.offsets_path();
    let data_path = opts.data_path();
    let offsets_meta =
        fs::metadata(&offsets_path).map_err(|_| AdminError::missing_segment(&offsets_path))?;
    let data_meta = fs::metadata(&data_path).map_err(|_| AdminError::missing_segment(&data_path))?;

    let engine = Engine::attach(opts.clone())?;
    let counters = engine.stats();
    let heap_fill_ratio = if counters.geometry.heap_words == 0 {
        0.0
    } else {
        counters.heap_words_used as f64 / counters.geometry.heap_words as f64
    };

    Ok(StatsReport {
        files: SegmentFiles {
            offsets_path: offsets_path.display().to_string(),
            offsets_size_bytes: offsets_meta.len(),
            data_path: data_path.display().to_string(),
            data_size_bytes: data_meta.len(),
        },
        geometry: counters.geometry,
        usage: UsageSection {
            rows_allocated: counters.rows_allocated,
            live_rows: counters.live_rows,
            heap_words_used: counters.heap_words_used,
            heap_fill_ratio,
            overflow_entries_used: counters.overflow_entries_used,
        },
        lock: LockSection {
            timeout_ms: opts.lock_timeout_ms,
        },
    })
}
