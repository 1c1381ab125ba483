//! AIC 错误类型
//!
//! 只有构造阶段会失败；运行期的非法寄存器访问只记录日志。

use super::{AIC_MAX_CPUS, AIC_MAX_IRQS};
use vm_core::{ConfigError, DeviceError, VmError};

/// AIC错误类型
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AicError {
    /// CPU 数无效
    #[error("Invalid CPU count {0} (expected 1..={max})", max = AIC_MAX_CPUS)]
    InvalidCpuCount(usize),
    /// 中断数无效
    #[error("Invalid IRQ count {0} (expected a non-zero multiple of 32 up to {max})", max = AIC_MAX_IRQS)]
    InvalidIrqCount(usize),
    /// 中断线数量与 CPU 数不一致
    #[error("Expected {expected} CPU interrupt lines, got {actual}")]
    CpuLineMismatch {
        /// CPU 数
        expected: usize,
        /// 实际提供的线数
        actual: usize,
    },
    /// 配置错误
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// AIC结果类型
pub type AicResult<T> = Result<T, AicError>;

impl From<AicError> for VmError {
    fn from(err: AicError) -> Self {
        match err {
            AicError::Config(e) => VmError::Config(e),
            other => VmError::Device(DeviceError::InitFailed {
                device_type: "aic".to_string(),
                message: other.to_string(),
            }),
        }
    }
}
