// DART配置
//
// 通常由设备树节点构造；也可以从 TOML/JSON 加载。

use crate::error::{DartError, DartResult};
use crate::instance::DartInstanceType;
use crate::{DART_MAX_INSTANCES, DART_MAX_STREAMS, DART_TLB_DEFAULT_CAPACITY, PageSize};
use serde::{Deserialize, Serialize};
use vm_core::{Config, ConfigError, DeviceTreeNode};

/// DART设备配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DartConfig {
    /// 设备名（设备树节点名）
    pub name: String,
    /// 页大小（0x1000 或 0x4000）
    pub page_size: u64,
    /// 有效 stream 掩码
    pub sids: u32,
    /// 旁路 stream 掩码
    pub bypass: u32,
    /// 旁路地址基址
    pub bypass_address: u64,
    /// `dart-options`
    pub options: u32,
    /// 各实例类型
    pub instances: Vec<DartInstanceType>,
    /// 各实例的 MMIO 区域 (base, size)
    pub regs: Vec<(u64, u64)>,
    /// 每个实例的 TLB 容量
    pub tlb_capacity: usize,
}

impl Default for DartConfig {
    fn default() -> Self {
        Self::defaults()
    }
}

impl DartConfig {
    /// 指定名字的默认配置
    pub fn defaults_for(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::defaults()
        }
    }

    /// 从设备树节点构造
    ///
    /// `page-size` 必须存在；`sids` 缺省为全部 16 个 stream。
    /// `instance` 属性缺省时，按 `reg` 区域数量创建 DART 类型实例。
    pub fn from_device_tree(node: &DeviceTreeNode) -> DartResult<Self> {
        let page_size = node
            .get_u32("page-size")
            .ok_or_else(|| ConfigError::MissingProperty(format!("{}: page-size", node.name)))?;
        let regs = node.get_reg();
        let instances = match node.get_str_list("instance") {
            Some(names) => names
                .iter()
                .map(|n| DartInstanceType::from_name(n))
                .collect(),
            None => vec![DartInstanceType::Dart; regs.len().max(1)],
        };

        let config = Self {
            name: node.name.clone(),
            page_size: u64::from(page_size),
            sids: node
                .get_u32("sids")
                .unwrap_or((1 << DART_MAX_STREAMS) - 1),
            bypass: node.get_u32("bypass").unwrap_or(0),
            bypass_address: node.get_u64("bypass-address").unwrap_or(0),
            options: node.get_u32("dart-options").unwrap_or(0),
            instances,
            regs,
            tlb_capacity: DART_TLB_DEFAULT_CAPACITY,
        };
        config.check()?;
        log::debug!(
            "{}: config from device tree: {} instance(s), sids={:#x}, bypass={:#x}",
            config.name,
            config.instances.len(),
            config.sids,
            config.bypass
        );
        Ok(config)
    }

    /// 检查配置，返回具体的 DART 错误
    pub fn check(&self) -> DartResult<()> {
        PageSize::from_size(self.page_size)?;
        if self.instances.is_empty() || self.instances.len() > DART_MAX_INSTANCES {
            return Err(DartError::InvalidInstanceCount(self.instances.len()));
        }
        let stream_limit = (1u32 << DART_MAX_STREAMS) - 1;
        for mask in [self.sids, self.bypass] {
            if mask & !stream_limit != 0 {
                return Err(DartError::InvalidStreamMask(mask));
            }
        }
        if !self.regs.is_empty() && self.regs.len() < self.instances.len() {
            return Err(DartError::RegionMismatch {
                instances: self.instances.len(),
                regs: self.regs.len(),
            });
        }
        Ok(())
    }
}

impl Config for DartConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        self.check().map_err(|e| match e {
            DartError::Config(inner) => inner,
            other => ConfigError::Invalid(other.to_string()),
        })
    }

    fn defaults() -> Self {
        Self {
            name: "dart".to_string(),
            page_size: 0x4000,
            sids: 1,
            bypass: 0,
            bypass_address: 0,
            options: 0,
            instances: vec![DartInstanceType::Dart],
            regs: Vec::new(),
            tlb_capacity: DART_TLB_DEFAULT_CAPACITY,
        }
    }

    fn merge(&self, other: &Self) -> Result<Self, ConfigError> {
        if self.page_size != other.page_size {
            return Err(ConfigError::MergeConflict(format!(
                "page_size {:#x} vs {:#x}",
                self.page_size, other.page_size
            )));
        }
        let mut merged = other.clone();
        if merged.name.is_empty() {
            merged.name = self.name.clone();
        }
        if merged.regs.is_empty() {
            merged.regs = self.regs.clone();
        }
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node() -> DeviceTreeNode {
        let mut node = DeviceTreeNode::new("dart-disp0");
        node.set_u32("page-size", 0x4000)
            .set_u32("sids", 0b101)
            .set_u32("bypass", 0b100)
            .set_u64("bypass-address", 0x8_0000_0000)
            .set_u32("dart-options", 0x2)
            .set_reg(&[(0x2_3130_4000, 0x4000), (0x2_3130_8000, 0x4000)]);
        node
    }

    #[test]
    fn test_from_device_tree() {
        let config = DartConfig::from_device_tree(&node()).expect("config");
        assert_eq!(config.name, "dart-disp0");
        assert_eq!(config.page_size, 0x4000);
        assert_eq!(config.sids, 0b101);
        assert_eq!(config.bypass_address, 0x8_0000_0000);
        assert_eq!(config.options, 2);
        assert_eq!(config.instances, vec![DartInstanceType::Dart; 2]);
    }

    #[test]
    fn test_instance_property() {
        let mut node = node();
        node.set_str_list("instance", &["DART", "SMMU"]);
        let config = DartConfig::from_device_tree(&node).expect("config");
        assert_eq!(
            config.instances,
            vec![DartInstanceType::Dart, DartInstanceType::Smmu]
        );
    }

    #[test]
    fn test_missing_page_size() {
        let node = DeviceTreeNode::new("dart-bad");
        assert!(matches!(
            DartConfig::from_device_tree(&node),
            Err(DartError::Config(ConfigError::MissingProperty(_)))
        ));
    }

    #[test]
    fn test_validate() {
        let mut config = DartConfig::defaults();
        assert!(config.validate().is_ok());

        config.page_size = 0x2000;
        assert!(config.validate().is_err());

        config.page_size = 0x1000;
        config.instances = vec![DartInstanceType::Dart; 3];
        assert_eq!(config.check(), Err(DartError::InvalidInstanceCount(3)));

        config.instances = vec![DartInstanceType::Dart];
        config.sids = 0x1_0000;
        assert_eq!(config.check(), Err(DartError::InvalidStreamMask(0x1_0000)));
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = DartConfig::from_toml(
            r#"
            name = "dart-ans"
            page_size = 16384
            sids = 3
            instances = ["DART", "DAPF"]
            "#,
        )
        .expect("parse");
        assert_eq!(config.sids, 3);
        assert_eq!(config.instances[1], DartInstanceType::Dapf);
        assert_eq!(config.tlb_capacity, DART_TLB_DEFAULT_CAPACITY);

        let text = config.to_toml().expect("serialize");
        assert_eq!(DartConfig::from_toml(&text).expect("reparse"), config);
    }

    #[test]
    fn test_merge() {
        let base = DartConfig::from_device_tree(&node()).expect("config");
        let overlay = DartConfig {
            name: String::new(),
            regs: Vec::new(),
            bypass: 0,
            ..base.clone()
        };
        let merged = base.merge(&overlay).expect("merge");
        assert_eq!(merged.name, "dart-disp0");
        assert_eq!(merged.regs.len(), 2);
        assert_eq!(merged.bypass, 0);

        let conflicting = DartConfig {
            page_size: 0x1000,
            ..base.clone()
        };
        assert!(base.merge(&conflicting).is_err());
    }
}
