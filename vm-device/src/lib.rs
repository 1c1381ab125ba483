//! # vm-device - 设备模型
//!
//! ## 中断控制器
//!
//! - [`aic`]: Apple Interrupt Controller，外部中断分发、IPI 与 IACK 认领

pub mod aic;

pub use aic::{Aic, AicConfig, AicCpuMmio, AicError, AicResult, AicStats};
