//! # vm-soc
//!
//! Apple SoC 片上设备装配层：从设备树节点构造 AIC 中断控制器与 DART
//! IOMMU，完成中断连线，并通过显式注册表向外设模型提供 IOMMU 区域。

pub mod registry;
pub mod soc;

pub use registry::SocRegistry;
pub use soc::AppleSoc;
