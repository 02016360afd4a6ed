//! Transformation parameters and the device capability descriptor.

use crate::ir::ast::Type;
use crate::utils::errors::{TransformError, TransformResult};
use serde::{Deserialize, Serialize};

/// Capabilities of the target device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceProps {
    /// Device name (informational)
    pub name: String,
    /// Upper limit on threads in one block
    pub max_threads_per_block: u32,
    /// Shared memory available to one block, in bytes
    pub shared_mem_per_block: u64,
    /// Threads per warp
    pub warp_size: u32,
    /// Compute capability (major, minor)
    pub compute_capability: (u32, u32),
}

impl Default for DeviceProps {
    fn default() -> Self {
        Self {
            name: "generic sm_20".to_string(),
            max_threads_per_block: 1024,
            shared_mem_per_block: 48 * 1024,
            warp_size: 32,
            compute_capability: (2, 0),
        }
    }
}

/// Kernel timing instrumentation emitted around the launch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Emit timing statements at all
    pub enabled: bool,
    /// File the timing line is appended to
    pub log_file: String,
    /// Host identifier holding the current repetition index
    pub rep_var: String,
    /// `fprintf` format; receives the repetition index and elapsed milliseconds
    pub label_format: String,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            log_file: "orcuda_time.out".to_string(),
            rep_var: "orio_i".to_string(),
            label_format: "Kernel_time@rep[%d]:%fms. ".to_string(),
        }
    }
}

/// Configuration of one loop-to-kernel transformation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CudaConfig {
    /// Target device
    pub device: DeviceProps,
    /// Threads per block
    pub thread_count: u32,
    /// Stage array accesses through block-local shared buffers
    pub cache_blocks: bool,
    /// Element type of data arrays and scalars
    pub element_type: Type,
    /// Type of identifiers appearing in the loop bound
    pub bound_type: Type,
    /// Timing instrumentation
    pub timing: TimingConfig,
}

impl Default for CudaConfig {
    fn default() -> Self {
        Self {
            device: DeviceProps::default(),
            thread_count: 128,
            cache_blocks: false,
            element_type: Type::Double,
            bound_type: Type::Int,
            timing: TimingConfig::default(),
        }
    }
}

impl CudaConfig {
    /// Create a new config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of threads per block.
    pub fn with_thread_count(mut self, count: u32) -> Self {
        self.thread_count = count;
        self
    }

    /// Enable or disable shared-memory caching.
    pub fn with_cache_blocks(mut self, enable: bool) -> Self {
        self.cache_blocks = enable;
        self
    }

    /// Set the target device.
    pub fn with_device(mut self, device: DeviceProps) -> Self {
        self.device = device;
        self
    }

    /// Set the element type of body data.
    pub fn with_element_type(mut self, ty: Type) -> Self {
        self.element_type = ty;
        self
    }

    /// Enable or disable timing instrumentation.
    pub fn with_timing(mut self, enabled: bool) -> Self {
        self.timing.enabled = enabled;
        self
    }

    /// Cache-blocked preset with the given block size.
    pub fn cached(thread_count: u32) -> Self {
        Self {
            thread_count,
            cache_blocks: true,
            ..Default::default()
        }
    }

    /// Check the launch parameters against the device.
    pub fn validate(&self) -> TransformResult<()> {
        let t = self.thread_count;
        if t == 0 {
            return Err(TransformError::invalid_config("thread count must be positive"));
        }
        if t > self.device.max_threads_per_block {
            return Err(TransformError::invalid_config(format!(
                "thread count {} exceeds the device limit of {} threads per block",
                t, self.device.max_threads_per_block
            )));
        }
        if self.element_type.size_in_bytes().is_none() {
            return Err(TransformError::invalid_config(format!(
                "element type `{}` has no known size",
                self.element_type
            )));
        }
        Ok(())
    }

    /// Check that the block size suits the in-block reduction tree, which
    /// halves the active span until it reaches zero.
    pub fn check_reduction_block(&self) -> TransformResult<()> {
        if !self.thread_count.is_power_of_two() {
            return Err(TransformError::invalid_config(format!(
                "thread count {} is not a power of two, as a reduction requires",
                self.thread_count
            )));
        }
        Ok(())
    }

    /// Check that `buffers` shared arrays of `thread_count` elements fit in
    /// the shared memory of one block.
    pub fn check_shared_memory(&self, buffers: usize) -> TransformResult<()> {
        let elem = self.element_type.size_in_bytes().unwrap_or(8);
        let needed = buffers as u64 * u64::from(self.thread_count) * elem;
        if needed > self.device.shared_mem_per_block {
            return Err(TransformError::invalid_config(format!(
                "{} shared buffers need {} bytes, device `{}` provides {}",
                buffers, needed, self.device.name, self.device.shared_mem_per_block
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::errors::TransformErrorKind;

    #[test]
    fn test_default_is_valid() {
        assert!(CudaConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_thread_counts() {
        for t in [0, 2048] {
            let err = CudaConfig::new().with_thread_count(t).validate().unwrap_err();
            assert_eq!(err.kind(), TransformErrorKind::InvalidConfig, "t = {}", t);
        }
    }

    #[test]
    fn test_odd_block_size_only_limits_reductions() {
        let cfg = CudaConfig::new().with_thread_count(96);
        assert!(cfg.validate().is_ok());
        let err = cfg.check_reduction_block().unwrap_err();
        assert_eq!(err.kind(), TransformErrorKind::InvalidConfig);
        assert!(CudaConfig::new().with_thread_count(256).check_reduction_block().is_ok());
    }

    #[test]
    fn test_shared_memory_budget() {
        let cfg = CudaConfig::cached(1024);
        // 6 * 1024 * 8 = 48 KiB fits exactly, one more does not
        assert!(cfg.check_shared_memory(6).is_ok());
        assert!(cfg.check_shared_memory(7).is_err());
    }

    #[test]
    fn test_deserialize_partial_config() {
        let cfg: CudaConfig =
            serde_json::from_str(r#"{ "thread_count": 256, "cache_blocks": true }"#).unwrap();
        assert_eq!(cfg.thread_count, 256);
        assert!(cfg.cache_blocks);
        assert_eq!(cfg.element_type, Type::Double);
        assert_eq!(cfg.timing.log_file, "orcuda_time.out");
    }
}
