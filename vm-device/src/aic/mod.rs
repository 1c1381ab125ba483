//! AIC - Apple Interrupt Controller
//!
//! 实现 Apple SoC 的中断控制器：外部中断的挂起/屏蔽/目标 CPU 亲和性、
//! 每个 CPU 的 IPI（普通、自身、延迟）以及 IACK 认领。
//!
//! 所有状态由一把锁保护。每次影响中断分发的寄存器写入以及周期 tick
//! 都会执行一次更新，决定需要拉高哪些 CPU 的中断线。中断线只在该 CPU
//! 读取 IACK 时拉低。

pub mod config;
mod cpu;
pub mod error;
pub mod mmio;
pub mod regs;
pub mod ticker;

pub use config::AicConfig;
pub use error::{AicError, AicResult};
pub use mmio::AicCpuMmio;
pub use regs::{AicCpuReg, AicReg};
pub use ticker::AicTicker;

use cpu::AicCpu;
use parking_lot::Mutex;
use regs::*;
use std::sync::Arc;
use std::time::Duration;
use vm_core::{IrqLine, IrqSink};

/// 最多 CPU 数（IPI 位图的 bit 31 保留给自身 IPI）
pub const AIC_MAX_CPUS: usize = 31;
/// 最多外部中断数
pub const AIC_MAX_IRQS: usize = 1024;

/// AIC统计信息
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AicStats {
    /// 更新次数
    pub updates: u64,
    /// IACK 读取次数
    pub iacks: u64,
    /// 读到 SPURIOUS 的次数
    pub spurious: u64,
    /// 发送的 IPI 数
    pub ipis_sent: u64,
}

impl std::fmt::Display for AicStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "AIC统计信息")?;
        writeln!(f, "  更新次数: {}", self.updates)?;
        writeln!(f, "  IACK次数: {}", self.iacks)?;
        writeln!(f, "  空中断次数: {}", self.spurious)?;
        writeln!(f, "  IPI发送数: {}", self.ipis_sent)
    }
}

/// 锁保护的控制器状态
struct AicState {
    /// 外部中断挂起位图
    eir_state: Vec<u32>,
    /// 外部中断屏蔽位图（1 = 屏蔽）
    eir_mask: Vec<u32>,
    /// 每个外部中断的目标 CPU 掩码
    eir_dest: Vec<u32>,
    cpus: Vec<AicCpu>,
    global_cfg: u32,
    stats: AicStats,
}

impl AicState {
    fn irq_pending(&self, irq: usize) -> bool {
        let bit = 1 << (irq % 32);
        self.eir_state[irq / 32] & bit != 0 && self.eir_mask[irq / 32] & bit == 0
    }

    fn reset(&mut self) {
        self.eir_state.fill(0);
        self.eir_mask.fill(u32::MAX);
        self.eir_dest.fill(0);
        for cpu in &mut self.cpus {
            cpu.reset();
        }
        self.global_cfg = 0;
    }
}

/// Apple 中断控制器
pub struct Aic {
    name: String,
    num_cpu: usize,
    num_irq: usize,
    tick_interval: Duration,
    state: Mutex<AicState>,
    ticker: Mutex<Option<AicTicker>>,
}

impl Aic {
    /// 创建新的 AIC
    ///
    /// # 参数
    /// - `config`: 配置
    /// - `cpu_irqs`: 每个 CPU 的中断线，数量必须等于 `config.num_cpu`
    ///
    /// 周期更新不会自动启动，见 [`Aic::start_ticker`]。
    pub fn new(config: &AicConfig, cpu_irqs: Vec<IrqLine>) -> AicResult<Arc<Self>> {
        config.check()?;
        if cpu_irqs.len() != config.num_cpu {
            return Err(AicError::CpuLineMismatch {
                expected: config.num_cpu,
                actual: cpu_irqs.len(),
            });
        }
        let num_eir = config.num_eir();
        let aic = Arc::new(Self {
            name: config.name.clone(),
            num_cpu: config.num_cpu,
            num_irq: config.num_irq,
            tick_interval: Duration::from_micros(config.tick_interval_us),
            state: Mutex::new(AicState {
                eir_state: vec![0; num_eir],
                eir_mask: vec![u32::MAX; num_eir],
                eir_dest: vec![0; config.num_irq],
                cpus: cpu_irqs.into_iter().map(AicCpu::new).collect(),
                global_cfg: 0,
                stats: AicStats::default(),
            }),
            ticker: Mutex::new(None),
        });
        log::info!(
            "{}: AIC created with {} CPUs, {} IRQs",
            aic.name,
            aic.num_cpu,
            aic.num_irq
        );
        Ok(aic)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn num_cpu(&self) -> usize {
        self.num_cpu
    }

    pub fn num_irq(&self) -> usize {
        self.num_irq
    }

    /// MMIO 窗口大小（含按 CPU 别名区）
    pub fn mmio_size(&self) -> u64 {
        regs::mmio_size(self.num_cpu)
    }

    /// 连接到第 `irq` 个外部中断输入的中断线
    pub fn irq_line(self: &Arc<Self>, irq: usize) -> IrqLine {
        IrqLine::new(Arc::clone(self) as Arc<dyn IrqSink>, irq)
    }

    /// CPU `cpu` 的 MMIO 视图
    pub fn cpu_mmio(self: &Arc<Self>, cpu: usize) -> Option<AicCpuMmio> {
        (cpu < self.num_cpu).then(|| AicCpuMmio::new(Arc::clone(self), cpu))
    }

    /// 启动周期更新；间隔为 0 或已启动时不做任何事
    pub fn start_ticker(self: &Arc<Self>) {
        if self.tick_interval.is_zero() {
            return;
        }
        let mut ticker = self.ticker.lock();
        if ticker.is_none() {
            *ticker = Some(AicTicker::spawn(Arc::downgrade(self), self.tick_interval));
        }
    }

    /// 停止周期更新
    pub fn stop_ticker(&self) {
        let ticker = self.ticker.lock().take();
        drop(ticker);
    }

    // ========================================================================
    // 中断分发
    // ========================================================================

    /// 执行一次更新
    pub fn update(&self) {
        let mut st = self.state.lock();
        self.update_locked(&mut st);
    }

    fn update_locked(&self, st: &mut AicState) {
        for cpu in &mut st.cpus {
            cpu.pending_ipi |= cpu.deferred_ipi;
            cpu.deferred_ipi = 0;
        }

        let mut intr = 0u32;
        for (i, cpu) in st.cpus.iter().enumerate() {
            if cpu.self_ipi_ready() || cpu.normal_ipi_ready() {
                intr |= 1 << i;
            }
        }

        let cpu_mask = (1u32 << self.num_cpu) - 1;
        let mut potential = 0u32;
        for irq in 0..self.num_irq {
            if !st.irq_pending(irq) {
                continue;
            }
            let dest = st.eir_dest[irq] & cpu_mask;
            if dest == 0 {
                continue;
            }
            if intr & dest == 0 {
                intr |= 1 << dest.trailing_zeros();
                potential |= dest;
            } else {
                let idle = potential & !intr;
                if idle != 0 {
                    intr |= 1 << idle.trailing_zeros();
                }
            }
        }

        for (i, cpu) in st.cpus.iter().enumerate() {
            if intr & (1 << i) != 0 {
                cpu.irq.raise();
            }
        }
        st.stats.updates += 1;
        log::trace!("{}: update raised CPUs {:#x}", self.name, intr);
    }

    /// 读取 IACK：拉低本 CPU 的中断线，按优先级认领并屏蔽一个中断源
    ///
    /// # 返回
    /// 事件编码（自身 IPI、普通 IPI、外部中断或 SPURIOUS）
    pub fn iack(&self, cpu: usize) -> u32 {
        if !self.check_cpu(cpu, "IACK") {
            return AIC_EVENT_SPURIOUS;
        }
        let mut st = self.state.lock();
        self.iack_locked(&mut st, cpu)
    }

    fn iack_locked(&self, st: &mut AicState, cpu: usize) -> u32 {
        st.stats.iacks += 1;
        let c = &mut st.cpus[cpu];
        c.irq.lower();

        if c.self_ipi_ready() {
            c.ipi_mask |= AIC_IPI_MASK_SELF;
            return AIC_EVENT_IPI_SELF;
        }
        if c.normal_ipi_ready() {
            c.ipi_mask |= AIC_IPI_MASK_NORMAL;
            return AIC_EVENT_IPI_NORMAL;
        }
        let claimed = (0..self.num_irq)
            .find(|&irq| st.irq_pending(irq) && st.eir_dest[irq] & (1 << cpu) != 0);
        match claimed {
            Some(irq) => {
                st.eir_mask[irq / 32] |= 1 << (irq % 32);
                log::debug!("{}: CPU {} claimed IRQ {}", self.name, cpu, irq);
                AIC_EVENT_EXT | irq as u32
            }
            None => {
                st.stats.spurious += 1;
                AIC_EVENT_SPURIOUS
            }
        }
    }

    /// 设置外部中断输入电平；上升沿触发一次更新
    pub fn set_irq(&self, irq: usize, level: bool) {
        if irq >= self.num_irq {
            log::warn!("{}: set_irq on invalid IRQ {}", self.name, irq);
            return;
        }
        let mut st = self.state.lock();
        let (word, bit) = (irq / 32, 1u32 << (irq % 32));
        let was_set = st.eir_state[word] & bit != 0;
        if level {
            st.eir_state[word] |= bit;
            if !was_set {
                self.update_locked(&mut st);
            }
        } else {
            st.eir_state[word] &= !bit;
        }
    }

    fn ipi_set(&self, st: &mut AicState, cpu: usize, value: u32) {
        for target in 0..self.num_cpu {
            if value & (1 << target) == 0 {
                continue;
            }
            let t = &mut st.cpus[target];
            t.pending_ipi |= 1 << cpu;
            if t.ipi_mask & AIC_IPI_MASK_NORMAL == 0 {
                t.irq.raise();
            }
            st.stats.ipis_sent += 1;
        }
        if value & AIC_IPI_SELF != 0 {
            let me = &mut st.cpus[cpu];
            me.pending_ipi |= AIC_IPI_SELF;
            if me.ipi_mask & AIC_IPI_MASK_SELF == 0 {
                me.irq.raise();
            }
            st.stats.ipis_sent += 1;
        }
    }

    fn ipi_clr(&self, st: &mut AicState, cpu: usize, value: u32) {
        for target in 0..self.num_cpu {
            if value & (1 << target) != 0 {
                st.cpus[target].pending_ipi &= !(1 << cpu);
            }
        }
        if value & AIC_IPI_SELF != 0 {
            st.cpus[cpu].pending_ipi &= !AIC_IPI_SELF;
        }
    }

    fn ipi_defer(&self, st: &mut AicState, cpu: usize, value: u32, set: bool) {
        let apply = |deferred: &mut u32, bit: u32| {
            if set {
                *deferred |= bit;
            } else {
                *deferred &= !bit;
            }
        };
        for target in 0..self.num_cpu {
            if value & (1 << target) != 0 {
                apply(&mut st.cpus[target].deferred_ipi, 1 << cpu);
            }
        }
        if value & AIC_IPI_SELF != 0 {
            apply(&mut st.cpus[cpu].deferred_ipi, AIC_IPI_SELF);
        }
    }

    // ========================================================================
    // 寄存器访问
    // ========================================================================

    fn check_cpu(&self, cpu: usize, op: &str) -> bool {
        if cpu >= self.num_cpu {
            log::warn!("{}: {} from invalid CPU {}", self.name, op, cpu);
            return false;
        }
        true
    }

    /// 以 CPU `cpu` 的身份读寄存器；`cpu` 越界时返回 0
    pub fn read_reg(&self, cpu: usize, reg: AicReg) -> u32 {
        if !self.check_cpu(cpu, "read") {
            return 0;
        }
        let mut st = self.state.lock();
        match reg {
            AicReg::Rev => AIC_REV,
            AicReg::Cap0 => (self.num_irq as u32) & 0xffff,
            AicReg::Cap1 => self.num_cpu as u32,
            AicReg::Rst => 0,
            AicReg::GlbCfg => st.global_cfg,
            AicReg::Cpu { cpu: alias, reg } => {
                let cpu = alias.unwrap_or(cpu);
                match reg {
                    AicCpuReg::WhoAmI => cpu as u32,
                    AicCpuReg::Iack => self.iack_locked(&mut st, cpu),
                    AicCpuReg::IpiSet | AicCpuReg::IpiClr => st.cpus[cpu].pending_ipi,
                    AicCpuReg::IpiMaskSet | AicCpuReg::IpiMaskClr => st.cpus[cpu].ipi_mask,
                    AicCpuReg::IpiDeferSet | AicCpuReg::IpiDeferClr => {
                        st.cpus[cpu].deferred_ipi
                    }
                }
            }
            AicReg::EirDest(irq) => st.eir_dest[irq],
            AicReg::SwSet(n) | AicReg::SwClr(n) => st.eir_state[n],
            AicReg::MaskSet(n) | AicReg::MaskClr(n) => st.eir_mask[n],
            AicReg::IntRo(n) => st.eir_state[n] & !st.eir_mask[n],
        }
    }

    /// 以 CPU `cpu` 的身份写寄存器；`cpu` 越界时忽略
    pub fn write_reg(&self, cpu: usize, reg: AicReg, value: u32) {
        if !self.check_cpu(cpu, "write") {
            return;
        }
        let mut guard = self.state.lock();
        let st = &mut *guard;
        log::debug!("{}: CPU {} write {:?} = {:#x}", self.name, cpu, reg, value);
        match reg {
            AicReg::Rev | AicReg::Cap0 | AicReg::Cap1 | AicReg::IntRo(_) => {
                log::debug!("{}: write to read-only {:?} ignored", self.name, reg);
            }
            AicReg::Rst => {
                st.reset();
                log::debug!("{}: reset by CPU {}", self.name, cpu);
            }
            AicReg::GlbCfg => st.global_cfg = value,
            AicReg::Cpu { cpu: alias, reg } => {
                let cpu = alias.unwrap_or(cpu);
                match reg {
                    AicCpuReg::WhoAmI | AicCpuReg::Iack => {
                        log::debug!("{}: write to read-only {:?} ignored", self.name, reg);
                    }
                    AicCpuReg::IpiSet => self.ipi_set(st, cpu, value),
                    AicCpuReg::IpiClr => self.ipi_clr(st, cpu, value),
                    AicCpuReg::IpiMaskSet => st.cpus[cpu].ipi_mask |= value,
                    AicCpuReg::IpiMaskClr => {
                        st.cpus[cpu].ipi_mask &= !value;
                        self.update_locked(st);
                    }
                    AicCpuReg::IpiDeferSet => self.ipi_defer(st, cpu, value, true),
                    AicCpuReg::IpiDeferClr => self.ipi_defer(st, cpu, value, false),
                }
            }
            AicReg::EirDest(irq) => {
                st.eir_dest[irq] = value;
                self.update_locked(st);
            }
            AicReg::SwSet(n) => {
                st.eir_state[n] |= value;
                self.update_locked(st);
            }
            AicReg::SwClr(n) => st.eir_state[n] &= !value,
            AicReg::MaskSet(n) => st.eir_mask[n] |= value,
            AicReg::MaskClr(n) => {
                st.eir_mask[n] &= !value;
                self.update_locked(st);
            }
        }
    }

    /// 复位所有寄存器状态
    pub fn reset(&self) {
        self.state.lock().reset();
    }

    /// 获取统计信息
    pub fn stats(&self) -> AicStats {
        self.state.lock().stats.clone()
    }
}

impl IrqSink for Aic {
    fn set_irq(&self, line: usize, level: bool) {
        Aic::set_irq(self, line, level);
    }
}

impl std::fmt::Debug for Aic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Aic")
            .field("name", &self.name)
            .field("num_cpu", &self.num_cpu)
            .field("num_irq", &self.num_irq)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vm_core::{Config, IrqLevels};

    fn aic(num_cpu: usize, num_irq: usize) -> (Arc<Aic>, Arc<IrqLevels>) {
        let levels = IrqLevels::new(num_cpu);
        let config = AicConfig {
            num_cpu,
            num_irq,
            ..AicConfig::defaults()
        };
        let lines = (0..num_cpu).map(|i| levels.line(i)).collect();
        (Aic::new(&config, lines).expect("aic"), levels)
    }

    #[test]
    fn test_reset_state() {
        let (aic, _) = aic(2, 64);
        assert_eq!(aic.read_reg(0, AicReg::MaskSet(0)), u32::MAX);
        assert_eq!(aic.read_reg(0, AicReg::MaskSet(1)), u32::MAX);
        assert_eq!(aic.read_reg(1, AicReg::Rev), AIC_REV);
        assert_eq!(aic.read_reg(1, AicReg::Cap0), 64);
        assert_eq!(aic.read_reg(1, AicReg::Cap1), 2);
        assert_eq!(aic.mmio_size(), 0x5100);
        let whoami = AicReg::Cpu {
            cpu: None,
            reg: AicCpuReg::WhoAmI,
        };
        assert_eq!(aic.read_reg(1, whoami), 1);
    }

    #[test]
    fn test_line_count_mismatch() {
        let config = AicConfig {
            num_cpu: 2,
            ..AicConfig::defaults()
        };
        assert_eq!(
            Aic::new(&config, vec![IrqLine::disconnected()]).err(),
            Some(AicError::CpuLineMismatch {
                expected: 2,
                actual: 1
            })
        );
    }

    #[test]
    fn test_set_irq_rising_edge_updates() {
        let (aic, levels) = aic(2, 32);
        aic.write_reg(0, AicReg::EirDest(3), 0b10);
        aic.write_reg(0, AicReg::MaskClr(0), 1 << 3);
        assert!(levels.raised_lines().is_empty());

        aic.set_irq(3, true);
        assert_eq!(levels.raised_lines(), vec![1]);
        let updates = aic.stats().updates;
        aic.set_irq(3, true);
        assert_eq!(aic.stats().updates, updates);

        aic.set_irq(3, false);
        assert_eq!(aic.read_reg(0, AicReg::SwSet(0)), 0);
        aic.set_irq(99, true);
    }

    #[test]
    fn test_rst_register() {
        let (aic, _) = aic(1, 32);
        aic.write_reg(0, AicReg::MaskClr(0), u32::MAX);
        aic.write_reg(0, AicReg::GlbCfg, 0x1234);
        aic.write_reg(0, AicReg::Rst, 1);
        assert_eq!(aic.read_reg(0, AicReg::MaskSet(0)), u32::MAX);
        assert_eq!(aic.read_reg(0, AicReg::GlbCfg), 0);
    }

    #[test]
    fn test_invalid_cpu_ignored() {
        let (aic, levels) = aic(2, 32);
        assert!(aic.cpu_mmio(2).is_none());
        assert_eq!(aic.iack(5), AIC_EVENT_SPURIOUS);
        let whoami = AicReg::Cpu {
            cpu: None,
            reg: AicCpuReg::WhoAmI,
        };
        assert_eq!(aic.read_reg(5, whoami), 0);
        let ipi_set = AicReg::Cpu {
            cpu: None,
            reg: AicCpuReg::IpiSet,
        };
        aic.write_reg(5, ipi_set, 0b11);
        assert!(levels.raised_lines().is_empty());
        assert_eq!(aic.stats().ipis_sent, 0);
    }

    #[test]
    fn test_stats_display() {
        let stats = AicStats {
            iacks: 2,
            ..AicStats::default()
        };
        assert!(stats.to_string().contains("IACK次数: 2"));
    }
}
