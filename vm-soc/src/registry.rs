//! SoC 设备注册表
//!
//! 机器装配层持有的显式注册表，按名字登记中断控制器与 DART 设备，
//! 外设模型通过它查找自己的 IOMMU 区域。

use anyhow::{Result, bail};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use vm_dart::{DartDevice, IommuRegion};
use vm_device::Aic;

/// 设备注册表
#[derive(Default)]
pub struct SocRegistry {
    aics: RwLock<BTreeMap<String, Arc<Aic>>>,
    darts: RwLock<BTreeMap<String, Arc<DartDevice>>>,
}

impl SocRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记中断控制器，名字重复时报错
    pub fn register_aic(&self, aic: Arc<Aic>) -> Result<()> {
        let mut aics = self.aics.write();
        if aics.contains_key(aic.name()) {
            bail!("interrupt controller {} already registered", aic.name());
        }
        log::debug!("registry: added AIC {}", aic.name());
        aics.insert(aic.name().to_string(), aic);
        Ok(())
    }

    /// 登记 DART 设备，名字重复时报错
    pub fn register_dart(&self, dart: Arc<DartDevice>) -> Result<()> {
        let mut darts = self.darts.write();
        if darts.contains_key(dart.name()) {
            bail!("DART {} already registered", dart.name());
        }
        log::debug!("registry: added DART {}", dart.name());
        darts.insert(dart.name().to_string(), dart);
        Ok(())
    }

    pub fn aic(&self, name: &str) -> Option<Arc<Aic>> {
        self.aics.read().get(name).cloned()
    }

    pub fn dart(&self, name: &str) -> Option<Arc<DartDevice>> {
        self.darts.read().get(name).cloned()
    }

    /// 已登记的 DART 名字（按名字排序）
    pub fn dart_names(&self) -> Vec<String> {
        self.darts.read().keys().cloned().collect()
    }

    /// 查找 IOMMU 区域
    ///
    /// # 参数
    /// - `dart`: DART 设备名
    /// - `instance`: 实例序号
    /// - `sid`: 逻辑 stream
    pub fn iommu_region(&self, dart: &str, instance: usize, sid: u8) -> Option<Arc<IommuRegion>> {
        self.darts.read().get(dart)?.iommu_region(instance, sid)
    }

    /// 复位所有已登记设备
    pub fn reset_all(&self) {
        for aic in self.aics.read().values() {
            aic.reset();
        }
        for dart in self.darts.read().values() {
            dart.reset();
        }
    }
}

impl std::fmt::Debug for SocRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocRegistry")
            .field("aics", &self.aics.read().keys().collect::<Vec<_>>())
            .field("darts", &self.darts.read().keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vm_core::{Config, GuestPhysAddr, GuestRam, IrqLine, MemoryAccess};
    use vm_dart::DartConfig;
    use vm_device::AicConfig;

    fn dart(name: &str) -> Arc<DartDevice> {
        let memory: Arc<dyn MemoryAccess> = Arc::new(GuestRam::new(GuestPhysAddr(0), 0x1000));
        let device = DartDevice::new(
            DartConfig::defaults_for(name),
            memory,
            IrqLine::disconnected(),
        )
        .expect("dart");
        Arc::new(device)
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = SocRegistry::new();
        registry.register_dart(dart("dart-b")).expect("register");
        registry.register_dart(dart("dart-a")).expect("register");
        assert_eq!(registry.dart_names(), vec!["dart-a", "dart-b"]);
        assert!(registry.dart("dart-a").is_some());
        assert!(registry.dart("missing").is_none());
        assert!(registry.iommu_region("dart-a", 0, 0).is_some());
        assert!(registry.iommu_region("dart-a", 1, 0).is_none());
        assert!(registry.iommu_region("missing", 0, 0).is_none());
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let registry = SocRegistry::new();
        registry.register_dart(dart("dart")).expect("register");
        assert!(registry.register_dart(dart("dart")).is_err());

        let aic = Aic::new(&AicConfig::defaults(), vec![IrqLine::disconnected()]).expect("aic");
        registry.register_aic(Arc::clone(&aic)).expect("register");
        assert!(registry.register_aic(aic).is_err());
        assert!(registry.aic("aic").is_some());
    }
}
