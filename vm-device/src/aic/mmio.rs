//! AIC MMIO 访问包装
//!
//! 每个 CPU 映射自己的视图；分组寄存器块中的"当前 CPU"在创建时确定。
//! 偏移在取锁之前完成解码，别名区访问的目标 CPU 也在此确定。

use super::Aic;
use super::regs::AicReg;
use std::sync::Arc;
use vm_core::{MmioDevice, VmResult};

/// 单个 CPU 的 AIC MMIO 视图
#[derive(Debug, Clone)]
pub struct AicCpuMmio {
    aic: Arc<Aic>,
    cpu: usize,
}

impl AicCpuMmio {
    /// 由 [`Aic::cpu_mmio`] 创建，`cpu` 已检查
    pub(crate) fn new(aic: Arc<Aic>, cpu: usize) -> Self {
        Self { aic, cpu }
    }

    pub fn cpu(&self) -> usize {
        self.cpu
    }

    /// 获取控制器的共享引用
    pub fn aic(&self) -> Arc<Aic> {
        Arc::clone(&self.aic)
    }

    fn decode(&self, offset: u64, size: u8, op: &str) -> Option<AicReg> {
        if size != 4 {
            log::warn!(
                "{}: CPU {} bad {} size {} at {:#x}",
                self.aic.name(),
                self.cpu,
                op,
                size,
                offset
            );
            return None;
        }
        let reg = AicReg::decode(offset, self.aic.num_irq(), self.aic.num_cpu());
        if reg.is_none() {
            log::warn!(
                "{}: CPU {} {} at unknown offset {:#x}",
                self.aic.name(),
                self.cpu,
                op,
                offset
            );
        }
        reg
    }
}

impl MmioDevice for AicCpuMmio {
    fn read(&self, offset: u64, size: u8) -> VmResult<u64> {
        Ok(self
            .decode(offset, size, "read")
            .map_or(0, |reg| u64::from(self.aic.read_reg(self.cpu, reg))))
    }

    fn write(&mut self, offset: u64, value: u64, size: u8) -> VmResult<()> {
        if let Some(reg) = self.decode(offset, size, "write") {
            self.aic.write_reg(self.cpu, reg, value as u32);
        }
        Ok(())
    }
}
