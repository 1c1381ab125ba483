//! 中断线抽象
//!
//! 设备只负责拉高/拉低自己的输出中断线，线的另一端（CPU 核心、
//! 其他中断控制器）在机器装配时连接。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// 中断接收端
///
/// 一个接收端有多条输入线，按编号区分。
pub trait IrqSink: Send + Sync {
    /// 设置输入线电平
    fn set_irq(&self, line: usize, level: bool);
}

/// 设备输出中断线
#[derive(Clone, Default)]
pub struct IrqLine {
    target: Option<(Arc<dyn IrqSink>, usize)>,
}

impl IrqLine {
    /// 连接到 `sink` 的第 `line` 条输入线
    pub fn new(sink: Arc<dyn IrqSink>, line: usize) -> Self {
        Self {
            target: Some((sink, line)),
        }
    }

    /// 未连接的中断线，所有操作都被忽略
    pub fn disconnected() -> Self {
        Self { target: None }
    }

    /// 是否已连接
    pub fn is_connected(&self) -> bool {
        self.target.is_some()
    }

    /// 设置电平
    pub fn set(&self, level: bool) {
        if let Some((sink, line)) = &self.target {
            sink.set_irq(*line, level);
        }
    }

    /// 拉高
    pub fn raise(&self) {
        self.set(true);
    }

    /// 拉低
    pub fn lower(&self) {
        self.set(false);
    }
}

impl std::fmt::Debug for IrqLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.target {
            Some((_, line)) => write!(f, "IrqLine({})", line),
            None => write!(f, "IrqLine(disconnected)"),
        }
    }
}

/// 记录电平的中断接收端
///
/// 用于把设备输出接到 CPU 核心模型（轮询电平）以及测试断言。
pub struct IrqLevels {
    levels: Vec<AtomicBool>,
    raises: Vec<AtomicU64>,
}

impl IrqLevels {
    /// 创建 `count` 条输入线，初始全部为低电平
    pub fn new(count: usize) -> Arc<Self> {
        Arc::new(Self {
            levels: (0..count).map(|_| AtomicBool::new(false)).collect(),
            raises: (0..count).map(|_| AtomicU64::new(0)).collect(),
        })
    }

    /// 获取连接到第 `n` 条输入线的 [`IrqLine`]
    pub fn line(self: &Arc<Self>, n: usize) -> IrqLine {
        IrqLine::new(self.clone(), n)
    }

    /// 当前电平
    pub fn is_raised(&self, n: usize) -> bool {
        self.levels
            .get(n)
            .is_some_and(|l| l.load(Ordering::Acquire))
    }

    /// 当前为高电平的线编号（升序）
    pub fn raised_lines(&self) -> Vec<usize> {
        (0..self.levels.len()).filter(|&n| self.is_raised(n)).collect()
    }

    /// 第 `n` 条线被拉高的累计次数
    pub fn raise_count(&self, n: usize) -> u64 {
        self.raises
            .get(n)
            .map_or(0, |c| c.load(Ordering::Acquire))
    }

    /// 全部拉低并清零计数
    pub fn clear(&self) {
        for l in &self.levels {
            l.store(false, Ordering::Release);
        }
        for c in &self.raises {
            c.store(0, Ordering::Release);
        }
    }
}

impl IrqSink for IrqLevels {
    fn set_irq(&self, line: usize, level: bool) {
        let Some(slot) = self.levels.get(line) else {
            log::warn!("IrqLevels: line {} out of range", line);
            return;
        };
        slot.store(level, Ordering::Release);
        if level {
            self.raises[line].fetch_add(1, Ordering::AcqRel);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_irq_line_raise_lower() {
        let levels = IrqLevels::new(4);
        let line = levels.line(2);
        line.raise();
        assert!(levels.is_raised(2));
        assert_eq!(levels.raised_lines(), vec![2]);
        line.lower();
        assert!(!levels.is_raised(2));
        assert_eq!(levels.raise_count(2), 1);
    }

    #[test]
    fn test_disconnected_line() {
        let line = IrqLine::disconnected();
        assert!(!line.is_connected());
        line.raise();
        assert_eq!(format!("{:?}", line), "IrqLine(disconnected)");
    }

    #[test]
    fn test_out_of_range_ignored() {
        let levels = IrqLevels::new(1);
        levels.set_irq(5, true);
        assert!(!levels.is_raised(5));
        assert_eq!(levels.raise_count(5), 0);
    }

    #[test]
    fn test_clear() {
        let levels = IrqLevels::new(2);
        levels.line(0).raise();
        levels.line(1).raise();
        levels.clear();
        assert!(levels.raised_lines().is_empty());
        assert_eq!(levels.raise_count(0), 0);
    }
}
