//! 物理内存访问 Trait
//!
//! 设备模型（页表遍历器、DMA 路径）只依赖这个接口访问客户机物理内存，
//! 不关心内存本身如何实现。

use crate::{GuestPhysAddr, MemoryError, VmError};

/// 内存访问接口
///
/// 多个设备可能并发发起 DMA，因此写操作也只需要共享引用，
/// 实现者自行负责内部同步。
pub trait MemoryAccess: Send + Sync {
    /// 批量读内存
    fn read_bulk(&self, pa: GuestPhysAddr, buf: &mut [u8]) -> Result<(), VmError>;

    /// 批量写内存
    fn write_bulk(&self, pa: GuestPhysAddr, buf: &[u8]) -> Result<(), VmError>;

    /// 获取物理内存大小
    fn memory_size(&self) -> usize;

    /// 从给定物理地址读取内存（小端）
    ///
    /// # 参数
    /// - `pa`: 物理地址
    /// - `size`: 读取大小（1/2/4/8 字节）
    fn read(&self, pa: GuestPhysAddr, size: u8) -> Result<u64, VmError> {
        let len = access_len(size)?;
        let mut bytes = [0u8; 8];
        self.read_bulk(pa, &mut bytes[..len])?;
        Ok(u64::from_le_bytes(bytes))
    }

    /// 向给定物理地址写入内存（小端）
    ///
    /// # 参数
    /// - `pa`: 物理地址
    /// - `val`: 要写入的值
    /// - `size`: 写入大小（1/2/4/8 字节）
    fn write(&self, pa: GuestPhysAddr, val: u64, size: u8) -> Result<(), VmError> {
        let len = access_len(size)?;
        self.write_bulk(pa, &val.to_le_bytes()[..len])
    }
}

fn access_len(size: u8) -> Result<usize, VmError> {
    match size {
        1 | 2 | 4 | 8 => Ok(size as usize),
        _ => Err(MemoryError::InvalidAccessSize(size).into()),
    }
}
