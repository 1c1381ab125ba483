// DART错误类型定义
//
// 地址转换故障记录在实例的错误寄存器中并通过中断线上报，
// 不会作为宿主错误返回。这里只有设备构造/配置阶段的错误。

use crate::{DART_MAX_INSTANCES, DART_MAX_STREAMS};
use vm_core::{ConfigError, DeviceError, VmError};

/// DART错误类型
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DartError {
    /// 不支持的页大小
    #[error("Unsupported page size {0:#x} (expected 0x1000 or 0x4000)")]
    UnsupportedPageSize(u64),
    /// 实例数量无效
    #[error("Invalid instance count {0} (expected 1..={max})", max = DART_MAX_INSTANCES)]
    InvalidInstanceCount(usize),
    /// stream 掩码超出范围
    #[error("Stream mask {0:#x} exceeds {max} streams", max = DART_MAX_STREAMS)]
    InvalidStreamMask(u32),
    /// `reg` 区域数量与实例数量不一致
    #[error("Device has {instances} instances but {regs} register regions")]
    RegionMismatch {
        /// 实例数
        instances: usize,
        /// 寄存器区域数
        regs: usize,
    },
    /// 配置错误
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// DART结果类型
pub type DartResult<T> = Result<T, DartError>;

impl From<DartError> for VmError {
    fn from(err: DartError) -> Self {
        match err {
            DartError::Config(e) => VmError::Config(e),
            other => VmError::Device(DeviceError::InitFailed {
                device_type: "dart".to_string(),
                message: other.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            DartError::UnsupportedPageSize(0x2000).to_string(),
            "Unsupported page size 0x2000 (expected 0x1000 or 0x4000)"
        );
        assert_eq!(
            DartError::InvalidInstanceCount(3).to_string(),
            "Invalid instance count 3 (expected 1..=2)"
        );
    }

    #[test]
    fn test_into_vm_error() {
        let err: VmError = DartError::InvalidStreamMask(0x1_0000).into();
        assert!(matches!(err, VmError::Device(DeviceError::InitFailed { .. })));

        let err: VmError = DartError::Config(ConfigError::MissingProperty("page-size".into())).into();
        assert!(matches!(err, VmError::Config(_)));
    }
}
