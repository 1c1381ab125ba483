//! 每个 CPU 的 IPI 状态

use super::regs::{AIC_IPI_MASK_NORMAL, AIC_IPI_MASK_SELF, AIC_IPI_SELF};
use vm_core::IrqLine;

/// 单个 CPU 的状态
#[derive(Debug, Clone)]
pub(crate) struct AicCpu {
    /// 挂起的 IPI：bit i 为来自 CPU i 的 IPI，bit 31 为自身 IPI
    pub(crate) pending_ipi: u32,
    /// 延迟的 IPI，在下一次更新时并入 `pending_ipi`
    pub(crate) deferred_ipi: u32,
    /// IPI 屏蔽（NORMAL = bit 0，SELF = bit 31）
    pub(crate) ipi_mask: u32,
    /// 到 CPU 的中断线
    pub(crate) irq: IrqLine,
}

impl AicCpu {
    pub(crate) fn new(irq: IrqLine) -> Self {
        Self {
            pending_ipi: 0,
            deferred_ipi: 0,
            ipi_mask: AIC_IPI_MASK_NORMAL | AIC_IPI_MASK_SELF,
            irq,
        }
    }

    /// 复位 IPI 状态，保留中断线
    pub(crate) fn reset(&mut self) {
        self.pending_ipi = 0;
        self.deferred_ipi = 0;
        self.ipi_mask = AIC_IPI_MASK_NORMAL | AIC_IPI_MASK_SELF;
    }

    /// 自身 IPI 挂起且未屏蔽
    pub(crate) fn self_ipi_ready(&self) -> bool {
        self.pending_ipi & AIC_IPI_SELF != 0 && self.ipi_mask & AIC_IPI_MASK_SELF == 0
    }

    /// 有来自其他 CPU 的 IPI 挂起且普通 IPI 未屏蔽
    pub(crate) fn normal_ipi_ready(&self) -> bool {
        self.pending_ipi & !AIC_IPI_SELF != 0 && self.ipi_mask & AIC_IPI_MASK_NORMAL == 0
    }
}
