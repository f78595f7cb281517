use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

macro_rules! renderer_stats {
    ($($(#[$doc:meta])* $name:ident => $inc:ident,)*) => {
        /// Telemetry counters for the renderer (queue, dispatch, caches, compilation).
        ///
        /// Updated with relaxed atomics from the processor thread and the compiler pool; safe to
        /// read from any thread.
        #[derive(Debug, Default)]
        pub struct RendererStats {
            $($(#[$doc])* $name: AtomicU64,)*
        }

        impl RendererStats {
            $(
                pub fn $inc(&self) {
                    self.$name.fetch_add(1, Ordering::Relaxed);
                }
            )*

            pub fn snapshot(&self) -> RendererStatsSnapshot {
                RendererStatsSnapshot {
                    $($name: self.$name.load(Ordering::Relaxed),)*
                }
            }
        }

        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
        pub struct RendererStatsSnapshot {
            $(pub $name: u64,)*
        }
    };
}

renderer_stats! {
    lists_submitted => inc_lists_submitted,
    lists_processed => inc_lists_processed,
    commands_executed => inc_commands_executed,
    /// Unknown opcodes and malformed payloads.
    commands_skipped => inc_commands_skipped,
    readiness_waits => inc_readiness_waits,
    /// `process_next` calls that gave up on an unready head.
    stalls => inc_stalls,
    sync_wait_timeouts => inc_sync_wait_timeouts,
    draws => inc_draws,
    frames => inc_frames,

    texture_hits => inc_texture_hits,
    texture_misses => inc_texture_misses,
    texture_evictions => inc_texture_evictions,
    texture_uploads => inc_texture_uploads,
    texture_uploads_skipped => inc_texture_uploads_skipped,

    surface_hits => inc_surface_hits,
    surface_misses => inc_surface_misses,
    surface_evictions => inc_surface_evictions,

    pipeline_hits => inc_pipeline_hits,
    pipeline_misses => inc_pipeline_misses,
    pipeline_evictions => inc_pipeline_evictions,
    pipeline_compiles => inc_pipeline_compiles,
    pipeline_compile_failures => inc_pipeline_compile_failures,
    /// Draws that used the fallback pipeline.
    pipeline_fallbacks => inc_pipeline_fallbacks,
    /// Compile requests dropped because the job queue was full.
    pipeline_queue_full => inc_pipeline_queue_full,
}

impl RendererStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a JSON object as a string.
    pub fn to_json(&self) -> String {
        self.snapshot().to_json()
    }
}

impl RendererStatsSnapshot {
    pub fn to_json(&self) -> String {
        // A struct of plain integers always serializes.
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_json_contains_counters() {
        let stats = RendererStats::new();
        stats.inc_lists_submitted();
        stats.inc_commands_skipped();
        stats.inc_commands_skipped();
        stats.inc_pipeline_fallbacks();

        let json = stats.to_json();
        assert!(json.contains("\"lists_submitted\":1"));
        assert!(json.contains("\"commands_skipped\":2"));
        assert!(json.contains("\"pipeline_fallbacks\":1"));
        assert!(json.contains("\"texture_hits\":0"));
    }

    #[test]
    fn snapshot_is_a_copy() {
        let stats = RendererStats::new();
        let before = stats.snapshot();
        stats.inc_frames();
        assert_eq!(before.frames, 0);
        assert_eq!(stats.snapshot().frames, 1);
    }
}
