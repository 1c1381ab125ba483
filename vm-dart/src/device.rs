// DART设备
//
// 一个设备包含 1~2 个实例，共享一条输出中断线。
// 只要任一 DART 类型实例的 ERROR_STATUS 非零，中断线保持高电平。

use crate::config::DartConfig;
use crate::error::DartResult;
use crate::instance::{DartInstance, DartInstanceType, DartStats};
use crate::iommu::IommuRegion;
use crate::mmio::DartMmio;
use parking_lot::Mutex;
use std::sync::Arc;
use vm_core::{IrqLine, MemoryAccess};

/// 设备级中断状态
///
/// 记录每个实例当前是否有未清除的错误，并据此驱动输出中断线。
pub(crate) struct DartIrq {
    line: IrqLine,
    /// 有错误的实例位图
    pending: Mutex<u32>,
}

impl DartIrq {
    pub(crate) fn new(line: IrqLine) -> Self {
        Self {
            line,
            pending: Mutex::new(0),
        }
    }

    /// 更新实例 `index` 的错误状态并重新计算中断线电平
    pub(crate) fn update(&self, index: usize, in_error: bool) {
        let mut pending = self.pending.lock();
        if in_error {
            *pending |= 1 << index;
        } else {
            *pending &= !(1 << index);
        }
        self.line.set(*pending != 0);
    }

    pub(crate) fn level(&self) -> bool {
        *self.pending.lock() != 0
    }
}

/// DART设备
pub struct DartDevice {
    /// 配置
    config: DartConfig,
    /// 硬件实例
    instances: Vec<Arc<DartInstance>>,
    /// 中断状态
    irq: Arc<DartIrq>,
}

impl DartDevice {
    /// 创建新的DART设备
    ///
    /// # 参数
    /// - `config`: 设备配置
    /// - `memory`: 页表与 DMA 所在的客户机物理内存
    /// - `irq`: 输出中断线
    pub fn new(
        config: DartConfig,
        memory: Arc<dyn MemoryAccess>,
        irq: IrqLine,
    ) -> DartResult<Self> {
        config.check()?;
        let irq = Arc::new(DartIrq::new(irq));
        let instances = config
            .instances
            .iter()
            .enumerate()
            .map(|(index, kind)| {
                DartInstance::new(&config, index, *kind, Arc::clone(&memory), Arc::clone(&irq))
            })
            .collect::<DartResult<Vec<_>>>()?;

        log::info!(
            "{}: DART created with {} instance(s), page size {:#x}",
            config.name,
            instances.len(),
            config.page_size
        );
        Ok(Self {
            config,
            instances,
            irq,
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &DartConfig {
        &self.config
    }

    pub fn num_instances(&self) -> usize {
        self.instances.len()
    }

    pub fn instance(&self, index: usize) -> Option<&Arc<DartInstance>> {
        self.instances.get(index)
    }

    /// 指定实例与逻辑 stream 的 IOMMU 区域
    pub fn iommu_region(&self, instance: usize, sid: u8) -> Option<Arc<IommuRegion>> {
        self.instances.get(instance)?.iommu_region(sid)
    }

    /// 第一个拥有该 stream 区域的 DART 实例的 IOMMU 区域
    pub fn find_iommu_region(&self, sid: u8) -> Option<Arc<IommuRegion>> {
        self.instances
            .iter()
            .filter(|i| i.kind() == DartInstanceType::Dart)
            .find_map(|i| i.iommu_region(sid))
    }

    /// 指定实例的 MMIO 访问包装
    pub fn mmio(&self, instance: usize) -> Option<DartMmio> {
        self.instances.get(instance).map(|i| DartMmio::new(Arc::clone(i)))
    }

    /// 指定实例的 MMIO 区域 (base, size)
    pub fn mmio_region(&self, instance: usize) -> Option<(u64, u64)> {
        self.config.regs.get(instance).copied()
    }

    /// 复位所有实例
    pub fn reset(&self) {
        for instance in &self.instances {
            instance.reset();
        }
        log::debug!("{}: reset", self.config.name);
    }

    /// 当前中断线电平
    pub fn irq_level(&self) -> bool {
        self.irq.level()
    }

    /// 所有实例统计信息之和
    pub fn stats(&self) -> DartStats {
        self.instances
            .iter()
            .map(|i| i.stats())
            .fold(DartStats::default(), |mut acc, s| {
                acc.translations += s.translations;
                acc.bypassed += s.bypassed;
                acc.tlb_hits += s.tlb_hits;
                acc.tlb_misses += s.tlb_misses;
                acc.walks += s.walks;
                acc.faults += s.faults;
                acc.invalidations += s.invalidations;
                acc
            })
    }
}

impl std::fmt::Debug for DartDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DartDevice")
            .field("name", &self.config.name)
            .field("instances", &self.instances)
            .finish()
    }
}
