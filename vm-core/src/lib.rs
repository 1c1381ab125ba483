//! # vm-core - 虚拟机核心库
//!
//! 提供 SoC 设备模型共享的核心类型定义和 Trait 抽象。
//!
//! ## 主要组件
//!
//! - **类型定义**: [`GuestPhysAddr`] 物理地址类型, [`AccessType`] 访问类型
//! - **设备抽象**: [`MmioDevice`] trait 定义 MMIO 寄存器接口
//! - **内存访问**: [`MemoryAccess`] trait 定义客户机物理内存读写接口, [`GuestRam`] 为平坦 RAM 模型
//! - **中断线**: [`IrqLine`] / [`IrqSink`] 抽象设备输出的电平中断
//! - **设备树**: [`DeviceTreeNode`] 保存已解析的设备树属性
//! - **错误处理**: [`VmError`] 统一错误类型
//! - **配置**: [`config::Config`] 统一配置 Trait
//!
//! ## 示例
//!
//! ```rust,ignore
//! use vm_core::{GuestRam, GuestPhysAddr, MemoryAccess};
//!
//! let ram = GuestRam::new(GuestPhysAddr(0x8_0000_0000), 0x10_0000);
//! ram.write(GuestPhysAddr(0x8_0000_0000), 0xdead_beef, 4)?;
//! ```

use serde::{Deserialize, Serialize};

// 模块定义
pub mod config;
pub mod device_tree;
pub mod error;
pub mod irq;
pub mod memory;
pub mod mmu_traits;

pub use config::{Config, ConfigError};
pub use device_tree::DeviceTreeNode;
pub use error::{DeviceError, MemoryError, VmError, VmResult};
pub use irq::{IrqLevels, IrqLine, IrqSink};
pub use memory::GuestRam;
pub use mmu_traits::MemoryAccess;

// ============================================================================
// 基础类型定义
// ============================================================================

/// 客户机物理地址
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GuestPhysAddr(pub u64);

impl GuestPhysAddr {
    /// Wrapping addition
    pub fn wrapping_add(self, rhs: u64) -> Self {
        GuestPhysAddr(self.0.wrapping_add(rhs))
    }
}

impl std::ops::Add<u64> for GuestPhysAddr {
    type Output = GuestPhysAddr;

    fn add(self, rhs: u64) -> Self::Output {
        GuestPhysAddr(self.0 + rhs)
    }
}

impl std::ops::AddAssign<u64> for GuestPhysAddr {
    fn add_assign(&mut self, rhs: u64) {
        self.0 += rhs;
    }
}

impl std::fmt::LowerHex for GuestPhysAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::LowerHex::fmt(&self.0, f)
    }
}

/// 访问类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessType {
    /// 读取
    Read,
    /// 写入
    Write,
}

// ============================================================================
// 设备抽象
// ============================================================================

/// MMIO设备接口
///
/// 所有通过内存映射寄存器访问的设备模型都实现此 trait。
/// `offset` 为设备映射基址内的偏移。
pub trait MmioDevice: Send + Sync {
    /// 读取MMIO寄存器
    ///
    /// # 参数
    /// - `offset`: 设备内的偏移地址（字节）
    /// - `size`: 读取大小（1/2/4/8 字节）
    ///
    /// # 返回
    /// 读取的数据值
    fn read(&self, offset: u64, size: u8) -> VmResult<u64>;

    /// 写入MMIO寄存器
    ///
    /// # 参数
    /// - `offset`: 设备内的偏移地址（字节）
    /// - `value`: 要写入的值
    /// - `size`: 写入大小（1/2/4/8 字节）
    fn write(&mut self, offset: u64, value: u64, size: u8) -> VmResult<()>;
}
