//! Apple SoC 装配
//!
//! 根据设备树节点创建 AIC 与 DART，并把每个 DART 的中断输出接到
//! AIC 的外部中断输入（节点的 `interrupts` 属性）。

use crate::registry::SocRegistry;
use anyhow::{Context, Result, bail};
use std::sync::Arc;
use vm_core::{DeviceTreeNode, IrqLine, MemoryAccess};
use vm_dart::{DartConfig, DartDevice, DartMmio, IommuRegion};
use vm_device::{Aic, AicConfig, AicCpuMmio};

/// Apple SoC 片上设备集合
pub struct AppleSoc {
    memory: Arc<dyn MemoryAccess>,
    aic: Arc<Aic>,
    aic_base: Option<u64>,
    registry: Arc<SocRegistry>,
}

impl AppleSoc {
    /// 创建 SoC 并启动 AIC 的周期更新
    ///
    /// # 参数
    /// - `memory`: 客户机物理内存
    /// - `aic_node`: AIC 设备树节点
    /// - `cpu_irqs`: 每个 CPU 的中断线，其数量即 CPU 数
    /// - `registry`: 设备注册表
    pub fn new(
        memory: Arc<dyn MemoryAccess>,
        aic_node: &DeviceTreeNode,
        cpu_irqs: Vec<IrqLine>,
        registry: Arc<SocRegistry>,
    ) -> Result<Self> {
        let config = AicConfig::from_device_tree(aic_node, cpu_irqs.len())
            .with_context(|| format!("invalid AIC node {}", aic_node.name))?;
        let aic = Aic::new(&config, cpu_irqs)
            .with_context(|| format!("failed to create AIC {}", aic_node.name))?;
        registry.register_aic(Arc::clone(&aic))?;
        aic.start_ticker();

        log::info!(
            "Apple SoC assembled: {} CPUs, {} IRQs, AIC window {:#x}",
            aic.num_cpu(),
            aic.num_irq(),
            aic.mmio_size()
        );
        let aic_base = aic_node.get_reg().first().map(|&(base, _)| base);
        Ok(Self {
            memory,
            aic,
            aic_base,
            registry,
        })
    }

    /// 根据设备树节点添加一个 DART
    ///
    /// 没有 `interrupts` 属性时 DART 的中断线悬空。
    pub fn add_dart(&self, node: &DeviceTreeNode) -> Result<Arc<DartDevice>> {
        let config = DartConfig::from_device_tree(node)
            .with_context(|| format!("invalid DART node {}", node.name))?;
        let irq = self
            .irq_for(node)
            .with_context(|| format!("bad interrupts property on {}", node.name))?;
        let dart = DartDevice::new(config, Arc::clone(&self.memory), irq)
            .with_context(|| format!("failed to create DART {}", node.name))?;
        let dart = Arc::new(dart);
        self.registry.register_dart(Arc::clone(&dart))?;
        Ok(dart)
    }

    fn irq_for(&self, node: &DeviceTreeNode) -> Result<IrqLine> {
        let Some(irqs) = node.get_u32_array("interrupts") else {
            log::warn!("{}: no interrupts property, IRQ left unconnected", node.name);
            return Ok(IrqLine::disconnected());
        };
        let Some(&irq) = irqs.first() else {
            bail!("empty interrupts property");
        };
        let irq = irq as usize;
        if irq >= self.aic.num_irq() {
            bail!("IRQ {} out of range (AIC has {})", irq, self.aic.num_irq());
        }
        log::debug!("{}: wired to AIC IRQ {}", node.name, irq);
        Ok(self.aic.irq_line(irq))
    }

    pub fn aic(&self) -> &Arc<Aic> {
        &self.aic
    }

    pub fn registry(&self) -> &Arc<SocRegistry> {
        &self.registry
    }

    /// AIC 的 MMIO 区域 (base, size)；基址来自设备树 `reg`
    pub fn aic_mmio_region(&self) -> Option<(u64, u64)> {
        self.aic_base.map(|base| (base, self.aic.mmio_size()))
    }

    /// CPU `cpu` 的 AIC MMIO 视图
    pub fn aic_mmio(&self, cpu: usize) -> Option<AicCpuMmio> {
        self.aic.cpu_mmio(cpu)
    }

    /// DART 实例的 MMIO 视图
    pub fn dart_mmio(&self, dart: &str, instance: usize) -> Option<DartMmio> {
        self.registry.dart(dart)?.mmio(instance)
    }

    /// 外设查找自己的 IOMMU 区域
    pub fn iommu_region(&self, dart: &str, instance: usize, sid: u8) -> Option<Arc<IommuRegion>> {
        self.registry.iommu_region(dart, instance, sid)
    }

    /// 复位所有片上设备
    pub fn reset(&self) {
        self.registry.reset_all();
        log::debug!("Apple SoC reset");
    }
}

impl Drop for AppleSoc {
    fn drop(&mut self) {
        self.aic.stop_ticker();
    }
}

impl std::fmt::Debug for AppleSoc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppleSoc")
            .field("aic", &self.aic)
            .field("registry", &self.registry)
            .finish()
    }
}
