use crate::config::ConfigError;

/// 统一的虚拟机错误类型
///
/// 设备模型、内存模型和机器装配层共用的错误类型。
/// 各设备 crate 自己的错误类型可以转换为此类型。
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum VmError {
    /// 内存管理错误
    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),
    /// 设备模拟错误
    #[error("Device error: {0}")]
    Device(#[from] DeviceError),
    /// 配置错误
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// 内存管理错误
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MemoryError {
    /// 访问越界
    #[error("Access out of bounds: addr={addr:#x} size={size}")]
    OutOfBounds {
        /// 访问地址
        addr: u64,
        /// 访问大小
        size: usize,
    },
    /// 无效访问大小
    #[error("Invalid access size: {0}")]
    InvalidAccessSize(u8),
    /// 地址转换失败（IOMMU 拒绝访问）
    #[error("Translation failed for iova {iova:#x}")]
    TranslationFault {
        /// 设备地址
        iova: u64,
    },
}

/// 设备模拟错误
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DeviceError {
    /// 初始化失败
    #[error("{device_type} init failed: {message}")]
    InitFailed {
        /// 设备类型
        device_type: String,
        /// 错误描述
        message: String,
    },
}

/// 统一结果类型
pub type VmResult<T> = Result<T, VmError>;
