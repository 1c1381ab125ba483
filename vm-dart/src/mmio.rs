// DART MMIO 访问包装
//
// 每个实例映射一个独立的 MMIO 窗口。

use crate::instance::DartInstance;
use std::sync::Arc;
use vm_core::{MmioDevice, VmResult};

/// 单个实例的 MMIO 设备
#[derive(Debug, Clone)]
pub struct DartMmio {
    instance: Arc<DartInstance>,
}

impl DartMmio {
    pub fn new(instance: Arc<DartInstance>) -> Self {
        Self { instance }
    }

    /// 获取实例的共享引用
    pub fn instance(&self) -> Arc<DartInstance> {
        Arc::clone(&self.instance)
    }
}

impl MmioDevice for DartMmio {
    fn read(&self, offset: u64, size: u8) -> VmResult<u64> {
        Ok(self.instance.read_reg(offset, size))
    }

    fn write(&mut self, offset: u64, value: u64, size: u8) -> VmResult<()> {
        self.instance.write_reg(offset, value, size);
        Ok(())
    }
}
