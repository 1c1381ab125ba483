//! 平坦客户机 RAM 模型
//!
//! 一段从 `base` 开始的连续物理内存，主要给设备模型和测试使用。

use crate::{GuestPhysAddr, MemoryAccess, MemoryError, VmError};
use parking_lot::RwLock;

/// 客户机 RAM
pub struct GuestRam {
    /// 物理基地址
    base: GuestPhysAddr,
    /// 内存内容
    data: RwLock<Vec<u8>>,
}

impl GuestRam {
    /// 创建新的 RAM
    ///
    /// # 参数
    /// - `base`: 物理基地址
    /// - `size`: 大小（字节），内容初始化为 0
    pub fn new(base: GuestPhysAddr, size: usize) -> Self {
        Self {
            base,
            data: RwLock::new(vec![0u8; size]),
        }
    }

    /// 物理基地址
    pub fn base(&self) -> GuestPhysAddr {
        self.base
    }

    /// 把物理地址区间换算为内部偏移
    fn offset_of(&self, pa: GuestPhysAddr, len: usize, total: usize) -> Result<usize, VmError> {
        let out_of_bounds = || MemoryError::OutOfBounds {
            addr: pa.0,
            size: len,
        };
        let offset = pa.0.checked_sub(self.base.0).ok_or_else(out_of_bounds)?;
        let offset = usize::try_from(offset).map_err(|_| out_of_bounds())?;
        match offset.checked_add(len) {
            Some(end) if end <= total => Ok(offset),
            _ => Err(out_of_bounds().into()),
        }
    }
}

impl MemoryAccess for GuestRam {
    fn read_bulk(&self, pa: GuestPhysAddr, buf: &mut [u8]) -> Result<(), VmError> {
        let data = self.data.read();
        let offset = self.offset_of(pa, buf.len(), data.len())?;
        buf.copy_from_slice(&data[offset..offset + buf.len()]);
        Ok(())
    }

    fn write_bulk(&self, pa: GuestPhysAddr, buf: &[u8]) -> Result<(), VmError> {
        let mut data = self.data.write();
        let offset = self.offset_of(pa, buf.len(), data.len())?;
        data[offset..offset + buf.len()].copy_from_slice(buf);
        Ok(())
    }

    fn memory_size(&self) -> usize {
        self.data.read().len()
    }
}
