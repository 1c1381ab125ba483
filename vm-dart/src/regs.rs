// DART寄存器布局
//
// 每个实例占用一段 0x4000 字节的 MMIO 窗口，所有寄存器均为 32 位。

use crate::{DART_MAX_STREAMS, DART_MAX_TTBR};

/// 实例 MMIO 窗口大小
pub const DART_REG_WINDOW: u64 = 0x4000;

// ============================================================================
// 寄存器偏移
// ============================================================================

pub const DART_PARAMS1: u64 = 0x000;
pub const DART_PARAMS2: u64 = 0x004;
pub const DART_TLB_OP: u64 = 0x020;
pub const DART_SID_MASK: u64 = 0x034;
pub const DART_ERROR_STATUS: u64 = 0x040;
pub const DART_ERROR_ADDR_LO: u64 = 0x050;
pub const DART_ERROR_ADDR_HI: u64 = 0x054;
pub const DART_CONFIG: u64 = 0x060;
pub const DART_SID_REMAP: u64 = 0x080;
pub const DART_TCR: u64 = 0x100;
pub const DART_TTBR: u64 = 0x200;

// ============================================================================
// 字段定义
// ============================================================================

pub const PARAMS1_PAGE_SHIFT_SHIFT: u32 = 24;
pub const PARAMS1_PAGE_SHIFT_MASK: u32 = 0xf << PARAMS1_PAGE_SHIFT_SHIFT;
pub const PARAMS1_ACCESS_REGION_PROTECTION: u32 = 1 << 31;

pub const PARAMS2_BYPASS_SUPPORT: u32 = 1 << 0;

pub const TLB_OP_BUSY: u32 = 1 << 2;
pub const TLB_OP_INVALIDATE: u32 = 1 << 20;

pub const ERROR_FLAG: u32 = 1 << 31;
pub const ERROR_STREAM_SHIFT: u32 = 24;
pub const ERROR_STREAM_MASK: u32 = 0xf << ERROR_STREAM_SHIFT;
pub const ERROR_TTBR_INVLD: u32 = 1 << 0;
pub const ERROR_L2E_INVLD: u32 = 1 << 1;
pub const ERROR_PTE_INVLD: u32 = 1 << 2;
pub const ERROR_WRITE_PROT: u32 = 1 << 3;
pub const ERROR_READ_PROT: u32 = 1 << 4;

pub const CONFIG_LOCK: u32 = 1 << 15;

pub const TCR_TXEN: u32 = 1 << 7;
pub const TCR_BYPASS_DART: u32 = 1 << 12;

pub const TTBR_VALID: u32 = 1 << 31;
pub const TTBR_ADDR_MASK: u32 = 0x0fff_ffff;
pub const TTBR_SHIFT: u32 = 12;

// ============================================================================
// 页表项格式
// ============================================================================

pub const PTE_VALID: u64 = 1 << 0;
pub const PTE_NO_WRITE: u64 = 1 << 7;
pub const PTE_NO_READ: u64 = 1 << 8;
/// 页表项中的物理地址字段（40 位）
pub const PTE_ADDR_MASK: u64 = (1 << 40) - 1;

/// 解码后的寄存器
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DartReg {
    Params1,
    Params2,
    TlbOp,
    SidMask,
    ErrorStatus,
    ErrorAddrLo,
    ErrorAddrHi,
    Config,
    /// 第 n 个重映射寄存器（每个覆盖 4 个 stream）
    SidRemap(usize),
    /// stream 的转换控制寄存器
    Tcr(usize),
    /// stream 的第 idx 个页表基址寄存器
    Ttbr { sid: usize, idx: usize },
}

impl DartReg {
    /// 把 MMIO 偏移解码为寄存器，未知偏移返回 `None`
    pub fn decode(offset: u64) -> Option<Self> {
        const REMAP_END: u64 = DART_SID_REMAP + (DART_MAX_STREAMS as u64);
        const TCR_END: u64 = DART_TCR + 4 * DART_MAX_STREAMS as u64;
        const TTBR_END: u64 = DART_TTBR + 4 * (DART_MAX_STREAMS * DART_MAX_TTBR) as u64;

        if offset & 3 != 0 {
            return None;
        }
        let reg = match offset {
            DART_PARAMS1 => DartReg::Params1,
            DART_PARAMS2 => DartReg::Params2,
            DART_TLB_OP => DartReg::TlbOp,
            DART_SID_MASK => DartReg::SidMask,
            DART_ERROR_STATUS => DartReg::ErrorStatus,
            DART_ERROR_ADDR_LO => DartReg::ErrorAddrLo,
            DART_ERROR_ADDR_HI => DartReg::ErrorAddrHi,
            DART_CONFIG => DartReg::Config,
            DART_SID_REMAP..REMAP_END => DartReg::SidRemap(((offset - DART_SID_REMAP) / 4) as usize),
            DART_TCR..TCR_END => DartReg::Tcr(((offset - DART_TCR) / 4) as usize),
            DART_TTBR..TTBR_END => {
                let word = ((offset - DART_TTBR) / 4) as usize;
                DartReg::Ttbr {
                    sid: word / DART_MAX_TTBR,
                    idx: word % DART_MAX_TTBR,
                }
            }
            _ => return None,
        };
        Some(reg)
    }

    /// 寄存器偏移
    pub fn offset(self) -> u64 {
        match self {
            DartReg::Params1 => DART_PARAMS1,
            DartReg::Params2 => DART_PARAMS2,
            DartReg::TlbOp => DART_TLB_OP,
            DartReg::SidMask => DART_SID_MASK,
            DartReg::ErrorStatus => DART_ERROR_STATUS,
            DartReg::ErrorAddrLo => DART_ERROR_ADDR_LO,
            DartReg::ErrorAddrHi => DART_ERROR_ADDR_HI,
            DartReg::Config => DART_CONFIG,
            DartReg::SidRemap(n) => DART_SID_REMAP + 4 * n as u64,
            DartReg::Tcr(sid) => DART_TCR + 4 * sid as u64,
            DartReg::Ttbr { sid, idx } => DART_TTBR + 4 * (sid * DART_MAX_TTBR + idx) as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_fixed() {
        assert_eq!(DartReg::decode(0x0), Some(DartReg::Params1));
        assert_eq!(DartReg::decode(0x20), Some(DartReg::TlbOp));
        assert_eq!(DartReg::decode(0x54), Some(DartReg::ErrorAddrHi));
        assert_eq!(DartReg::decode(0x60), Some(DartReg::Config));
        assert_eq!(DartReg::decode(0x08), None);
        assert_eq!(DartReg::decode(0x41), None);
    }

    #[test]
    fn test_decode_arrays() {
        assert_eq!(DartReg::decode(0x8c), Some(DartReg::SidRemap(3)));
        assert_eq!(DartReg::decode(0x90), None);
        assert_eq!(DartReg::decode(0x13c), Some(DartReg::Tcr(15)));
        assert_eq!(DartReg::decode(0x140), None);
        assert_eq!(
            DartReg::decode(0x214),
            Some(DartReg::Ttbr { sid: 1, idx: 1 })
        );
        assert_eq!(
            DartReg::decode(0x2fc),
            Some(DartReg::Ttbr { sid: 15, idx: 3 })
        );
        assert_eq!(DartReg::decode(0x300), None);
    }

    #[test]
    fn test_offset_roundtrip() {
        for reg in [
            DartReg::ErrorStatus,
            DartReg::SidRemap(2),
            DartReg::Tcr(7),
            DartReg::Ttbr { sid: 9, idx: 2 },
        ] {
            assert_eq!(DartReg::decode(reg.offset()), Some(reg));
        }
    }
}
