//! AIC 配置

use super::error::{AicError, AicResult};
use super::{AIC_MAX_CPUS, AIC_MAX_IRQS};
use serde::{Deserialize, Serialize};
use vm_core::{Config, ConfigError, DeviceTreeNode};

/// 默认的更新周期（微秒）
pub const AIC_DEFAULT_TICK_US: u64 = 1000;

/// AIC 配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AicConfig {
    /// 设备名
    pub name: String,
    /// CPU 数
    pub num_cpu: usize,
    /// 外部中断数（32 的倍数）
    pub num_irq: usize,
    /// 周期更新间隔（微秒），0 表示不启动周期更新
    pub tick_interval_us: u64,
}

impl Default for AicConfig {
    fn default() -> Self {
        Self::defaults()
    }
}

impl AicConfig {
    /// 从设备树节点构造
    ///
    /// 中断数由 `ipid-mask` 的字数决定（每字 32 个中断）；
    /// CPU 数来自机器配置而非 AIC 节点。
    pub fn from_device_tree(node: &DeviceTreeNode, num_cpu: usize) -> AicResult<Self> {
        let words = node
            .get_u32_array("ipid-mask")
            .ok_or_else(|| ConfigError::MissingProperty(format!("{}: ipid-mask", node.name)))?;
        let config = Self {
            name: node.name.clone(),
            num_cpu,
            num_irq: 32 * words.len(),
            ..Self::defaults()
        };
        config.check()?;
        log::debug!(
            "{}: config from device tree: {} CPUs, {} IRQs",
            config.name,
            config.num_cpu,
            config.num_irq
        );
        Ok(config)
    }

    /// EIR 位图字数
    pub fn num_eir(&self) -> usize {
        self.num_irq / 32
    }

    /// 检查配置，返回具体的 AIC 错误
    pub fn check(&self) -> AicResult<()> {
        if self.num_cpu == 0 || self.num_cpu > AIC_MAX_CPUS {
            return Err(AicError::InvalidCpuCount(self.num_cpu));
        }
        if self.num_irq == 0 || self.num_irq % 32 != 0 || self.num_irq > AIC_MAX_IRQS {
            return Err(AicError::InvalidIrqCount(self.num_irq));
        }
        Ok(())
    }
}

impl Config for AicConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        self.check().map_err(|e| match e {
            AicError::Config(inner) => inner,
            other => ConfigError::Invalid(other.to_string()),
        })
    }

    fn defaults() -> Self {
        Self {
            name: "aic".to_string(),
            num_cpu: 1,
            num_irq: 32,
            tick_interval_us: AIC_DEFAULT_TICK_US,
        }
    }

    fn merge(&self, other: &Self) -> Result<Self, ConfigError> {
        if self.num_irq != other.num_irq {
            return Err(ConfigError::MergeConflict(format!(
                "num_irq {} vs {}",
                self.num_irq, other.num_irq
            )));
        }
        let mut merged = other.clone();
        if merged.name.is_empty() {
            merged.name = self.name.clone();
        }
        Ok(merged)
    }
}
