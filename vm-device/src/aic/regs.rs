//! AIC 寄存器偏移
//!
//! 0x2000 开始的一组寄存器按 CPU 分组：通过某个 CPU 的视图访问时，
//! "当前 CPU" 就是该视图绑定的 CPU；0x5000 + 0x80·cpu 处是指定 CPU 的别名。

/// 全局寄存器
pub mod offsets {
    /// 版本（只读）
    pub const REV: u64 = 0x0000;
    /// 能力 0：bits 15:0 中断数
    pub const CAP0: u64 = 0x0004;
    /// 能力 1：CPU 数
    pub const CAP1: u64 = 0x0008;
    /// 复位
    pub const RST: u64 = 0x000c;
    /// 全局配置
    pub const GLB_CFG: u64 = 0x0010;

    /// 按 CPU 分组的寄存器块
    pub const CPU_BLOCK: u64 = 0x2000;
    /// 分组块大小
    pub const CPU_BLOCK_SIZE: u64 = 0x80;

    /// 外部中断目标 CPU 掩码（每个中断一个字）
    pub const EIR_DEST: u64 = 0x3000;
    /// 软件置位（每 32 个中断一个字）
    pub const EIR_SW_SET: u64 = 0x4000;
    /// 软件清除
    pub const EIR_SW_CLR: u64 = 0x4080;
    /// 屏蔽置位
    pub const EIR_MASK_SET: u64 = 0x4100;
    /// 屏蔽清除
    pub const EIR_MASK_CLR: u64 = 0x4180;
    /// 未屏蔽的挂起中断（只读）
    pub const EIR_INT_RO: u64 = 0x4200;
    /// EIR 位图窗口大小
    pub const EIR_WINDOW: u64 = 0x80;

    /// 按 CPU 别名区起始
    pub const CPU_ALIAS: u64 = 0x5000;
}

/// 分组块内偏移
pub mod cpu_offsets {
    pub const WHOAMI: u64 = 0x00;
    pub const IACK: u64 = 0x04;
    pub const IPI_SET: u64 = 0x08;
    pub const IPI_CLR: u64 = 0x0c;
    pub const IPI_MASK_SET: u64 = 0x24;
    pub const IPI_MASK_CLR: u64 = 0x28;
    pub const IPI_DEFER_SET: u64 = 0x2c;
    pub const IPI_DEFER_CLR: u64 = 0x30;
}

/// REV 寄存器值
pub const AIC_REV: u32 = 2;

/// 来自本 CPU 的 IPI（IPI_SET/CLR 中的位，以及挂起位图中的位）
pub const AIC_IPI_SELF: u32 = 1 << 31;

/// IPI 屏蔽位：普通 IPI
pub const AIC_IPI_MASK_NORMAL: u32 = 1 << 0;
/// IPI 屏蔽位：自身 IPI
pub const AIC_IPI_MASK_SELF: u32 = 1 << 31;

// IACK 事件编码
pub const AIC_EVENT_SPURIOUS: u32 = 0;
pub const AIC_EVENT_EXT: u32 = 0x1_0000;
pub const AIC_EVENT_IPI_NORMAL: u32 = 0x4_0001;
pub const AIC_EVENT_IPI_SELF: u32 = 0x4_0002;

/// 按 CPU 分组的寄存器
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AicCpuReg {
    WhoAmI,
    Iack,
    IpiSet,
    IpiClr,
    IpiMaskSet,
    IpiMaskClr,
    IpiDeferSet,
    IpiDeferClr,
}

impl AicCpuReg {
    fn decode(offset: u64) -> Option<Self> {
        use cpu_offsets::*;
        let reg = match offset {
            WHOAMI => AicCpuReg::WhoAmI,
            IACK => AicCpuReg::Iack,
            IPI_SET => AicCpuReg::IpiSet,
            IPI_CLR => AicCpuReg::IpiClr,
            IPI_MASK_SET => AicCpuReg::IpiMaskSet,
            IPI_MASK_CLR => AicCpuReg::IpiMaskClr,
            IPI_DEFER_SET => AicCpuReg::IpiDeferSet,
            IPI_DEFER_CLR => AicCpuReg::IpiDeferClr,
            _ => return None,
        };
        Some(reg)
    }
}

/// 解码后的寄存器
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AicReg {
    Rev,
    Cap0,
    Cap1,
    Rst,
    GlbCfg,
    /// 分组寄存器；`cpu` 为 `None` 时表示访问者自己
    Cpu { cpu: Option<usize>, reg: AicCpuReg },
    EirDest(usize),
    SwSet(usize),
    SwClr(usize),
    MaskSet(usize),
    MaskClr(usize),
    IntRo(usize),
}

impl AicReg {
    /// 解码 MMIO 偏移
    ///
    /// # 参数
    /// - `offset`: 偏移
    /// - `num_irq`: 中断数
    /// - `num_cpu`: CPU 数
    pub fn decode(offset: u64, num_irq: usize, num_cpu: usize) -> Option<Self> {
        use offsets::*;

        if offset & 3 != 0 {
            return None;
        }
        let num_eir = num_irq.div_ceil(32) as u64;
        let eir_word = |base: u64| {
            let n = (offset - base) / 4;
            (n < num_eir).then_some(n as usize)
        };

        match offset {
            REV => Some(AicReg::Rev),
            CAP0 => Some(AicReg::Cap0),
            CAP1 => Some(AicReg::Cap1),
            RST => Some(AicReg::Rst),
            GLB_CFG => Some(AicReg::GlbCfg),
            o if (CPU_BLOCK..CPU_BLOCK + CPU_BLOCK_SIZE).contains(&o) => {
                AicCpuReg::decode(o - CPU_BLOCK).map(|reg| AicReg::Cpu { cpu: None, reg })
            }
            o if (EIR_DEST..EIR_SW_SET).contains(&o) => {
                let irq = ((o - EIR_DEST) / 4) as usize;
                (irq < num_irq).then_some(AicReg::EirDest(irq))
            }
            o if (EIR_SW_SET..EIR_SW_CLR).contains(&o) => eir_word(EIR_SW_SET).map(AicReg::SwSet),
            o if (EIR_SW_CLR..EIR_MASK_SET).contains(&o) => eir_word(EIR_SW_CLR).map(AicReg::SwClr),
            o if (EIR_MASK_SET..EIR_MASK_CLR).contains(&o) => {
                eir_word(EIR_MASK_SET).map(AicReg::MaskSet)
            }
            o if (EIR_MASK_CLR..EIR_INT_RO).contains(&o) => {
                eir_word(EIR_MASK_CLR).map(AicReg::MaskClr)
            }
            o if (EIR_INT_RO..EIR_INT_RO + EIR_WINDOW).contains(&o) => {
                eir_word(EIR_INT_RO).map(AicReg::IntRo)
            }
            o if o >= CPU_ALIAS => {
                let cpu = ((o - CPU_ALIAS) / CPU_BLOCK_SIZE) as usize;
                if cpu >= num_cpu {
                    return None;
                }
                AicCpuReg::decode((o - CPU_ALIAS) % CPU_BLOCK_SIZE).map(|reg| AicReg::Cpu {
                    cpu: Some(cpu),
                    reg,
                })
            }
            _ => None,
        }
    }
}

/// 控制器 MMIO 窗口大小
pub fn mmio_size(num_cpu: usize) -> u64 {
    offsets::CPU_ALIAS + offsets::CPU_BLOCK_SIZE * num_cpu as u64
}
