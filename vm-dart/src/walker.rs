// 页表遍历
//
// DART 使用三级页表：
// - L0: 由地址最高的索引位选择 stream 的某个 TTBR
// - L1: 从 TTBR 指向的表中读取下一级表描述符
// - L2: 读取叶子页表项，得到物理页与读写权限
//
// 每级表占一页，表项 8 字节，因此每级索引宽度为 page_shift - 3。

use crate::regs::{
    ERROR_L2E_INVLD, ERROR_PTE_INVLD, ERROR_TTBR_INVLD, PTE_ADDR_MASK, PTE_NO_READ, PTE_NO_WRITE,
    PTE_VALID, TTBR_ADDR_MASK, TTBR_SHIFT, TTBR_VALID,
};
use crate::tlb::TlbEntry;
use crate::{DART_MAX_TTBR, IommuPerm, PageSize};
use vm_core::{GuestPhysAddr, MemoryAccess};

/// 页表遍历故障
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum WalkFault {
    /// 选中的 TTBR 无效
    #[error("TTBR not valid")]
    TtbrInvalid,
    /// 中间级表项无效或不可读
    #[error("L2 table entry not valid")]
    L2eInvalid,
    /// 叶子页表项无效
    #[error("PTE not valid")]
    PteInvalid,
}

impl WalkFault {
    /// 对应的 ERROR_STATUS 位
    pub fn error_code(self) -> u32 {
        match self {
            WalkFault::TtbrInvalid => ERROR_TTBR_INVLD,
            WalkFault::L2eInvalid => ERROR_L2E_INVLD,
            WalkFault::PteInvalid => ERROR_PTE_INVLD,
        }
    }
}

/// 页表遍历器
#[derive(Debug, Clone, Copy)]
pub struct PageTableWalker {
    /// 页位移
    page_shift: u32,
    /// 每级索引位移
    l_shift: [u32; 3],
    /// 每级索引掩码
    l_mask: [u64; 3],
}

impl PageTableWalker {
    /// 按页大小生成各级索引参数
    pub fn new(page: PageSize) -> Self {
        let page_shift = page.shift();
        let bits = page_shift - 3;
        let level_mask = (1u64 << bits) - 1;
        Self {
            page_shift,
            l_shift: [page_shift + 2 * bits, page_shift + bits, page_shift],
            l_mask: [DART_MAX_TTBR as u64 - 1, level_mask, level_mask],
        }
    }

    pub fn page_mask(&self) -> u64 {
        (1u64 << self.page_shift) - 1
    }

    /// 第 `level` 级的表索引
    pub fn index(&self, level: usize, addr: u64) -> u64 {
        (addr >> self.l_shift[level]) & self.l_mask[level]
    }

    /// 遍历页表
    ///
    /// # 参数
    /// - `memory`: 客户机物理内存
    /// - `ttbrs`: stream 的全部 TTBR
    /// - `addr`: 设备地址
    ///
    /// # 返回
    /// 页对齐的物理地址与叶子权限
    pub fn walk(
        &self,
        memory: &dyn MemoryAccess,
        ttbrs: &[u32; DART_MAX_TTBR],
        addr: u64,
    ) -> Result<TlbEntry, WalkFault> {
        let ttbr = ttbrs[self.index(0, addr) as usize];
        if ttbr & TTBR_VALID == 0 {
            return Err(WalkFault::TtbrInvalid);
        }
        let l1_base = u64::from(ttbr & TTBR_ADDR_MASK) << TTBR_SHIFT;

        let l1e = self
            .read_entry(memory, l1_base, self.index(1, addr))
            .ok_or(WalkFault::L2eInvalid)?;
        if l1e & PTE_VALID == 0 {
            return Err(WalkFault::L2eInvalid);
        }
        let l2_base = l1e & PTE_ADDR_MASK & !self.page_mask();

        let pte = self
            .read_entry(memory, l2_base, self.index(2, addr))
            .ok_or(WalkFault::L2eInvalid)?;
        if pte & PTE_VALID == 0 {
            return Err(WalkFault::PteInvalid);
        }

        Ok(TlbEntry {
            pa: pte & PTE_ADDR_MASK & !self.page_mask(),
            perm: IommuPerm::from_rw(pte & PTE_NO_READ == 0, pte & PTE_NO_WRITE == 0),
        })
    }

    fn read_entry(&self, memory: &dyn MemoryAccess, base: u64, index: u64) -> Option<u64> {
        let pa = GuestPhysAddr(base + 8 * index);
        match memory.read(pa, 8) {
            Ok(value) => Some(value),
            Err(e) => {
                log::debug!("DART walk: table read at {:#x} failed: {}", pa, e);
                None
            }
        }
    }
}
