//! # vm-dart - Apple DART IOMMU 模型
//!
//! DART（Device Address Resolution Table）是 Apple SoC 上外设 DMA 使用的 IOMMU。
//! 每个 DART 设备包含最多 2 个硬件实例，只有 DART 类型的实例执行地址转换，
//! SMMU/DAPF 等类型的实例只是寄存器占位。
//!
//! ## 主要组件
//!
//! - [`regs`]: 寄存器布局与 PTE 格式常量
//! - [`tlb`]: 按 (stream, 页号) 索引的转换缓存
//! - [`walker`]: 三级页表遍历
//! - [`instance`]: 单个硬件实例（寄存器文件、TLB、转换入口）
//! - [`iommu`]: 面向外设的 IOMMU 区域与失效通知
//! - [`device`]: DART 设备（实例集合与中断线）
//! - [`mmio`]: MMIO 寄存器访问包装
//!
//! ## 示例
//!
//! ```rust,ignore
//! let dart = DartDevice::new(config, ram.clone(), aic_line)?;
//! let region = dart.iommu_region(0, 1).expect("stream 1");
//! let entry = region.translate(0x4000, IommuPerm::ReadOnly);
//! ```

use serde::{Deserialize, Serialize};
use vm_core::AccessType;

pub mod config;
pub mod device;
pub mod error;
pub mod instance;
pub mod iommu;
pub mod mmio;
pub mod regs;
pub mod tlb;
pub mod walker;

pub use config::DartConfig;
pub use device::DartDevice;
pub use error::{DartError, DartResult};
pub use instance::{DartInstance, DartInstanceType, DartStats};
pub use iommu::{IommuEvent, IommuNotifier, IommuRegion, IommuTlbEntry, NotifierHandle};
pub use mmio::DartMmio;
pub use tlb::{DartTlb, TlbEntry, TlbStats};
pub use walker::{PageTableWalker, WalkFault};

// ============================================================================
// 常量定义
// ============================================================================

/// 每个设备最多的硬件实例数
pub const DART_MAX_INSTANCES: usize = 2;
/// 每个实例最多的 stream 数
pub const DART_MAX_STREAMS: usize = 16;
/// 每个 stream 的 TTBR 数
pub const DART_MAX_TTBR: usize = 4;
/// 默认 TLB 容量
pub const DART_TLB_DEFAULT_CAPACITY: usize = 4096;
/// `dart-options` 中表示访问区域保护能力的位
pub const DART_OPTION_ACCESS_REGION_PROTECTION: u32 = 1 << 1;

// ============================================================================
// 基础类型
// ============================================================================

/// 页大小
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PageSize {
    /// 4KB 页
    Size4KB,
    /// 16KB 页
    Size16KB,
}

impl PageSize {
    /// 从字节数解析页大小
    pub fn from_size(size: u64) -> DartResult<Self> {
        match size {
            0x1000 => Ok(PageSize::Size4KB),
            0x4000 => Ok(PageSize::Size16KB),
            other => Err(DartError::UnsupportedPageSize(other)),
        }
    }

    /// 页位移
    pub fn shift(self) -> u32 {
        match self {
            PageSize::Size4KB => 12,
            PageSize::Size16KB => 14,
        }
    }

    /// 页大小（字节）
    pub fn size(self) -> u64 {
        1 << self.shift()
    }

    /// 页内偏移掩码
    pub fn mask(self) -> u64 {
        self.size() - 1
    }
}

/// IOMMU 访问权限
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum IommuPerm {
    /// 无权限
    #[default]
    None,
    /// 只读
    ReadOnly,
    /// 只写
    WriteOnly,
    /// 读写
    ReadWrite,
}

impl IommuPerm {
    /// 由读/写两个标志组合
    pub fn from_rw(read: bool, write: bool) -> Self {
        match (read, write) {
            (true, true) => IommuPerm::ReadWrite,
            (true, false) => IommuPerm::ReadOnly,
            (false, true) => IommuPerm::WriteOnly,
            (false, false) => IommuPerm::None,
        }
    }

    pub fn can_read(self) -> bool {
        matches!(self, IommuPerm::ReadOnly | IommuPerm::ReadWrite)
    }

    pub fn can_write(self) -> bool {
        matches!(self, IommuPerm::WriteOnly | IommuPerm::ReadWrite)
    }

    /// 当前权限是否满足请求的访问
    pub fn allows(self, request: IommuPerm) -> bool {
        (!request.can_read() || self.can_read()) && (!request.can_write() || self.can_write())
    }
}

impl From<AccessType> for IommuPerm {
    fn from(access: AccessType) -> Self {
        match access {
            AccessType::Read => IommuPerm::ReadOnly,
            AccessType::Write => IommuPerm::WriteOnly,
        }
    }
}
