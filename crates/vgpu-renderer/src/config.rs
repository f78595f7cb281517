//! Renderer configuration.
//!
//! Every section has defaults, so a config file only needs to name the values it changes:
//!
//! ```json
//! { "texture_cache": { "upload_policy": "always" }, "processor": { "max_stall_ms": 33 } }
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// When a cached texture is re-uploaded on a cache hit.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadPolicy {
    /// Re-upload on every bind.
    Always,
    /// Re-upload only when the xxh3 hash of the texel (and palette) bytes changed.
    #[default]
    ContentHash,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct TextureCacheConfig {
    pub capacity: usize,
    pub upload_policy: UploadPolicy,
}

impl Default for TextureCacheConfig {
    fn default() -> Self {
        Self {
            capacity: 1024,
            upload_policy: UploadPolicy::default(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct SurfaceCacheConfig {
    pub capacity: usize,
}

impl Default for SurfaceCacheConfig {
    fn default() -> Self {
        Self { capacity: 32 }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineCacheConfig {
    pub capacity: usize,
    /// Compile on a worker pool and draw with the fallback pipeline until the result is ready.
    pub async_compile: bool,
    pub compiler_threads: usize,
    /// Bound of the compile job queue. Requests that do not fit are retried on a later draw.
    pub queue_depth: usize,
}

impl Default for PipelineCacheConfig {
    fn default() -> Self {
        Self {
            capacity: 512,
            async_compile: true,
            compiler_threads: 2,
            queue_depth: 64,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessorConfig {
    /// Upper bound of a single wait on the head list's sync object before re-checking.
    pub readiness_wait_us: u64,
    /// How long `process_next` keeps retrying an unready head before giving up.
    pub max_stall_ms: u64,
}

impl ProcessorConfig {
    pub fn readiness_wait(&self) -> Duration {
        Duration::from_micros(self.readiness_wait_us)
    }

    pub fn max_stall(&self) -> Duration {
        Duration::from_millis(self.max_stall_ms)
    }
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            readiness_wait_us: 500,
            max_stall_ms: 16,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct RendererConfig {
    pub texture_cache: TextureCacheConfig,
    pub surface_cache: SurfaceCacheConfig,
    pub pipeline_cache: PipelineCacheConfig,
    pub processor: ProcessorConfig,
}

impl RendererConfig {
    /// Parses and validates a JSON config.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.texture_cache.capacity == 0 {
            return Err(ConfigError::Zero("texture_cache.capacity"));
        }
        if self.surface_cache.capacity == 0 {
            return Err(ConfigError::Zero("surface_cache.capacity"));
        }
        if self.pipeline_cache.capacity == 0 {
            return Err(ConfigError::Zero("pipeline_cache.capacity"));
        }
        if self.pipeline_cache.async_compile {
            if self.pipeline_cache.compiler_threads == 0 {
                return Err(ConfigError::Zero("pipeline_cache.compiler_threads"));
            }
            if self.pipeline_cache.queue_depth == 0 {
                return Err(ConfigError::Zero("pipeline_cache.queue_depth"));
            }
        }
        if self.processor.readiness_wait_us == 0 {
            return Err(ConfigError::Zero("processor.readiness_wait_us"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn empty_object_yields_defaults() {
        let config = RendererConfig::from_json_str("{}").unwrap();
        assert_eq!(config, RendererConfig::default());
        assert_eq!(config.processor.readiness_wait(), Duration::from_micros(500));
        assert_eq!(config.processor.max_stall(), Duration::from_millis(16));
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = RendererConfig::from_json_str(
            r#"{ "texture_cache": { "upload_policy": "always" }, "pipeline_cache": { "async_compile": false } }"#,
        )
        .unwrap();
        assert_eq!(config.texture_cache.upload_policy, UploadPolicy::Always);
        assert_eq!(config.texture_cache.capacity, 1024);
        assert!(!config.pipeline_cache.async_compile);
        assert_eq!(config.pipeline_cache.capacity, 512);
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let err = RendererConfig::from_json_str(r#"{ "texture_cache": { "capacity": 0 } }"#)
            .unwrap_err();
        assert!(matches!(err, ConfigError::Zero("texture_cache.capacity")));
        assert_eq!(err.to_string(), "texture_cache.capacity must be > 0");
    }

    #[test]
    fn zero_workers_only_matter_for_async_compile() {
        let mut config = RendererConfig::default();
        config.pipeline_cache.compiler_threads = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Zero("pipeline_cache.compiler_threads"))
        ));
        config.pipeline_cache.async_compile = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn unknown_fields_are_parse_errors() {
        let err = RendererConfig::from_json_str(r#"{ "procesor": {} }"#).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
