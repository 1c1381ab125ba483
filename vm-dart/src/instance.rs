// DART硬件实例
//
// 每个实例有自己的寄存器文件、TLB 和互斥锁。转换入口与 TLB 失效
// 都在实例锁内完成，包括失效时对 IOMMU 区域观察者的通知。

use crate::config::DartConfig;
use crate::device::DartIrq;
use crate::iommu::{IommuRegion, IommuTlbEntry};
use crate::regs::*;
use crate::tlb::{DartTlb, TlbEntry, TlbStats};
use crate::walker::PageTableWalker;
use crate::{
    DART_MAX_STREAMS, DART_MAX_TTBR, DART_OPTION_ACCESS_REGION_PROTECTION, DartResult, IommuPerm,
    PageSize,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use vm_core::MemoryAccess;

/// 实例类型
///
/// 只有 `Dart` 执行地址转换，其余类型只保存写入的寄存器值。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DartInstanceType {
    Dart,
    Smmu,
    Dapf,
    Unknown,
}

impl DartInstanceType {
    /// 由设备树 `instance` 属性中的名字解析
    ///
    /// 同时接受按小端存储的 FourCC 反序写法（"TRAD" 等）。
    pub fn from_name(name: &str) -> Self {
        match name.trim() {
            "DART" | "TRAD" => DartInstanceType::Dart,
            "SMMU" | "UMMS" => DartInstanceType::Smmu,
            "DAPF" | "FPAD" => DartInstanceType::Dapf,
            _ => DartInstanceType::Unknown,
        }
    }
}

impl std::fmt::Display for DartInstanceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DartInstanceType::Dart => "DART",
            DartInstanceType::Smmu => "SMMU",
            DartInstanceType::Dapf => "DAPF",
            DartInstanceType::Unknown => "UNKNOWN",
        };
        f.write_str(name)
    }
}

/// DART统计信息
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DartStats {
    /// 转换请求次数
    pub translations: u64,
    /// 旁路次数（bypass 掩码、TXEN 关闭或 BYPASS_DART）
    pub bypassed: u64,
    /// TLB 命中次数
    pub tlb_hits: u64,
    /// TLB 未命中次数
    pub tlb_misses: u64,
    /// 页表遍历次数
    pub walks: u64,
    /// 记录的故障次数
    pub faults: u64,
    /// TLB_OP 失效次数
    pub invalidations: u64,
}

impl std::fmt::Display for DartStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "DART统计信息")?;
        writeln!(f, "  总转换次数: {}", self.translations)?;
        writeln!(f, "  旁路次数: {}", self.bypassed)?;
        writeln!(f, "  TLB命中次数: {}", self.tlb_hits)?;
        writeln!(f, "  TLB未命中次数: {}", self.tlb_misses)?;
        writeln!(f, "  页表遍历次数: {}", self.walks)?;
        writeln!(f, "  故障次数: {}", self.faults)?;
        writeln!(f, "  失效次数: {}", self.invalidations)
    }
}

/// 寄存器文件
#[derive(Debug, Clone)]
struct DartRegs {
    tlb_op: u32,
    sid_mask: u32,
    error_status: u32,
    error_address: u64,
    config: u32,
    remap: [u8; DART_MAX_STREAMS],
    tcr: [u32; DART_MAX_STREAMS],
    ttbr: [[u32; DART_MAX_TTBR]; DART_MAX_STREAMS],
}

impl Default for DartRegs {
    fn default() -> Self {
        let mut remap = [0u8; DART_MAX_STREAMS];
        for (sid, slot) in remap.iter_mut().enumerate() {
            *slot = sid as u8;
        }
        Self {
            tlb_op: 0,
            sid_mask: 0,
            error_status: 0,
            error_address: 0,
            config: 0,
            remap,
            tcr: [0; DART_MAX_STREAMS],
            ttbr: [[0; DART_MAX_TTBR]; DART_MAX_STREAMS],
        }
    }
}

impl DartRegs {
    fn stream(&self, sid: u8) -> u8 {
        self.remap[usize::from(sid) & 0xf] & 0xf
    }

    fn locked(&self) -> bool {
        self.config & CONFIG_LOCK != 0
    }
}

/// 锁保护的可变状态
struct InstanceState {
    regs: DartRegs,
    /// 非 DART 类型实例的寄存器
    stub: BTreeMap<u64, u32>,
    tlb: DartTlb,
    stats: DartStats,
}

/// DART硬件实例
pub struct DartInstance {
    /// 设备名
    name: String,
    /// 实例编号
    index: usize,
    /// 实例类型
    kind: DartInstanceType,
    page: PageSize,
    walker: PageTableWalker,
    bypass: u32,
    bypass_address: u64,
    options: u32,
    tlb_capacity: usize,
    memory: Arc<dyn MemoryAccess>,
    irq: Arc<DartIrq>,
    /// 按逻辑 stream 索引的 IOMMU 区域
    regions: Vec<Option<Arc<IommuRegion>>>,
    state: Mutex<InstanceState>,
}

impl DartInstance {
    /// 创建实例
    ///
    /// DART 类型实例为 `config.sids` 中的每个 stream 创建一个 IOMMU 区域。
    pub(crate) fn new(
        config: &DartConfig,
        index: usize,
        kind: DartInstanceType,
        memory: Arc<dyn MemoryAccess>,
        irq: Arc<DartIrq>,
    ) -> DartResult<Arc<Self>> {
        let page = PageSize::from_size(config.page_size)?;
        let instance = Arc::new_cyclic(|weak| {
            let regions = (0..DART_MAX_STREAMS)
                .map(|sid| {
                    let valid = kind == DartInstanceType::Dart && config.sids & (1 << sid) != 0;
                    valid.then(|| {
                        Arc::new(IommuRegion::new(
                            format!("{}-{}-sid{}", config.name, index, sid),
                            sid as u8,
                            weak.clone(),
                            Arc::clone(&memory),
                        ))
                    })
                })
                .collect();

            DartInstance {
                name: config.name.clone(),
                index,
                kind,
                page,
                walker: PageTableWalker::new(page),
                bypass: config.bypass,
                bypass_address: config.bypass_address,
                options: config.options,
                tlb_capacity: config.tlb_capacity,
                memory: Arc::clone(&memory),
                irq,
                regions,
                state: Mutex::new(InstanceState {
                    regs: DartRegs::default(),
                    stub: BTreeMap::new(),
                    tlb: DartTlb::new(config.tlb_capacity),
                    stats: DartStats::default(),
                }),
            }
        });
        log::debug!(
            "{}: instance {} ({}) created, page size {:#x}",
            instance.name,
            index,
            kind,
            page.size()
        );
        Ok(instance)
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn kind(&self) -> DartInstanceType {
        self.kind
    }

    /// 逻辑 stream 的 IOMMU 区域
    pub fn iommu_region(&self, sid: u8) -> Option<Arc<IommuRegion>> {
        self.regions.get(usize::from(sid))?.clone()
    }

    // ========================================================================
    // 地址转换
    // ========================================================================

    /// 转换入口
    ///
    /// # 参数
    /// - `sid`: 逻辑 stream ID
    /// - `addr`: 设备地址
    /// - `flags`: 请求的访问权限
    ///
    /// # 返回
    /// 转换结果；故障时权限为 `None`，故障记录在错误寄存器中
    pub fn translate(&self, sid: u8, addr: u64, flags: IommuPerm) -> IommuTlbEntry {
        let page_mask = self.page.mask();
        let iova_page = addr & !page_mask;
        let passthrough = |base: u64| IommuTlbEntry {
            iova: iova_page,
            translated_addr: base.wrapping_add(iova_page),
            addr_mask: page_mask,
            perm: IommuPerm::ReadWrite,
        };

        if self.kind != DartInstanceType::Dart {
            log::warn!(
                "{}: translate on {} instance {}",
                self.name,
                self.kind,
                self.index
            );
            return passthrough(0);
        }

        let mut guard = self.state.lock();
        let st = &mut *guard;
        st.stats.translations += 1;

        let stream = st.regs.stream(sid);
        if self.bypass & (1 << stream) != 0 {
            st.stats.bypassed += 1;
            return passthrough(self.bypass_address);
        }
        let tcr = st.regs.tcr[usize::from(stream)];
        if tcr & TCR_TXEN == 0 || tcr & TCR_BYPASS_DART != 0 {
            st.stats.bypassed += 1;
            return passthrough(0);
        }

        let iova = addr >> self.page.shift();
        let mut faulted = false;
        let entry = match st.tlb.lookup(stream, iova) {
            Some(entry) => {
                st.stats.tlb_hits += 1;
                entry
            }
            None => {
                st.stats.tlb_misses += 1;
                st.stats.walks += 1;
                let ttbrs = st.regs.ttbr[usize::from(stream)];
                match self.walker.walk(self.memory.as_ref(), &ttbrs, addr) {
                    Ok(entry) => {
                        st.tlb.insert(stream, iova, entry);
                        entry
                    }
                    Err(fault) => {
                        log::debug!(
                            "{}: walk fault on stream {} addr {:#x}: {}",
                            self.name,
                            stream,
                            addr,
                            fault
                        );
                        self.record_fault(st, stream, fault.error_code(), addr);
                        faulted = true;
                        TlbEntry {
                            pa: 0,
                            perm: IommuPerm::None,
                        }
                    }
                }
            }
        };

        let mut prot = 0;
        if flags.can_read() && !entry.perm.can_read() {
            prot |= ERROR_READ_PROT;
        }
        if flags.can_write() && !entry.perm.can_write() {
            prot |= ERROR_WRITE_PROT;
        }
        if prot != 0 {
            self.record_fault(st, stream, prot, addr);
            faulted = true;
        }
        if faulted {
            self.update_irq(st);
        }

        IommuTlbEntry {
            iova: iova_page,
            translated_addr: entry.pa,
            addr_mask: page_mask,
            perm: entry.perm,
        }
    }

    fn record_fault(&self, st: &mut InstanceState, stream: u8, code: u32, addr: u64) {
        st.regs.error_status = (st.regs.error_status & !ERROR_STREAM_MASK)
            | ERROR_FLAG
            | (u32::from(stream) << ERROR_STREAM_SHIFT)
            | code;
        st.regs.error_address = addr;
        st.stats.faults += 1;
        log::debug!(
            "{}: instance {} fault {:#x} stream {} addr {:#x}",
            self.name,
            self.index,
            code,
            stream,
            addr
        );
    }

    fn update_irq(&self, st: &InstanceState) {
        self.irq.update(self.index, st.regs.error_status != 0);
    }

    // ========================================================================
    // 寄存器访问
    // ========================================================================

    /// 读寄存器
    ///
    /// 只解码 4 字节访问，其他宽度和未知偏移读为 0。
    pub fn read_reg(&self, offset: u64, size: u8) -> u64 {
        if size != 4 {
            log::warn!(
                "{}: instance {} bad read size {} at {:#x}",
                self.name,
                self.index,
                size,
                offset
            );
            return 0;
        }
        let st = self.state.lock();
        if self.kind != DartInstanceType::Dart {
            return u64::from(st.stub.get(&offset).copied().unwrap_or(0));
        }
        let Some(reg) = DartReg::decode(offset) else {
            log::warn!(
                "{}: instance {} read from unknown offset {:#x}",
                self.name,
                self.index,
                offset
            );
            return 0;
        };

        let value = match reg {
            DartReg::Params1 => {
                let mut v = self.page.shift() << PARAMS1_PAGE_SHIFT_SHIFT;
                if self.options & DART_OPTION_ACCESS_REGION_PROTECTION != 0 {
                    v |= PARAMS1_ACCESS_REGION_PROTECTION;
                }
                v
            }
            DartReg::Params2 => PARAMS2_BYPASS_SUPPORT,
            DartReg::TlbOp => st.regs.tlb_op,
            DartReg::SidMask => st.regs.sid_mask,
            DartReg::ErrorStatus => st.regs.error_status,
            DartReg::ErrorAddrLo => st.regs.error_address as u32,
            DartReg::ErrorAddrHi => (st.regs.error_address >> 32) as u32,
            DartReg::Config => st.regs.config,
            DartReg::SidRemap(n) => {
                let mut bytes = [0u8; 4];
                bytes.copy_from_slice(&st.regs.remap[4 * n..4 * n + 4]);
                u32::from_le_bytes(bytes)
            }
            DartReg::Tcr(sid) => st.regs.tcr[sid],
            DartReg::Ttbr { sid, idx } => st.regs.ttbr[sid][idx],
        };
        log::debug!(
            "{}: instance {} read {:?} = {:#x}",
            self.name,
            self.index,
            reg,
            value
        );
        u64::from(value)
    }

    /// 写寄存器
    pub fn write_reg(&self, offset: u64, value: u64, size: u8) {
        if size != 4 {
            log::warn!(
                "{}: instance {} bad write size {} at {:#x}",
                self.name,
                self.index,
                size,
                offset
            );
            return;
        }
        let value = value as u32;
        let mut guard = self.state.lock();
        let st = &mut *guard;
        if self.kind != DartInstanceType::Dart {
            st.stub.insert(offset, value);
            return;
        }
        let Some(reg) = DartReg::decode(offset) else {
            log::warn!(
                "{}: instance {} write {:#x} to unknown offset {:#x}",
                self.name,
                self.index,
                value,
                offset
            );
            return;
        };
        log::debug!(
            "{}: instance {} write {:?} = {:#x}",
            self.name,
            self.index,
            reg,
            value
        );

        match reg {
            DartReg::Params1 | DartReg::Params2 | DartReg::ErrorAddrLo | DartReg::ErrorAddrHi => {
                log::debug!("{}: write to read-only {:?} ignored", self.name, reg);
            }
            DartReg::TlbOp => self.write_tlb_op(st, value),
            DartReg::SidMask => st.regs.sid_mask = value,
            DartReg::ErrorStatus => {
                st.regs.error_status &= !value;
                self.update_irq(st);
            }
            DartReg::Config => st.regs.config = value | (st.regs.config & CONFIG_LOCK),
            DartReg::SidRemap(_) | DartReg::Tcr(_) | DartReg::Ttbr { .. } if st.regs.locked() => {
                log::warn!(
                    "{}: instance {} is locked, write to {:?} dropped",
                    self.name,
                    self.index,
                    reg
                );
            }
            DartReg::SidRemap(n) => {
                st.regs.remap[4 * n..4 * n + 4].copy_from_slice(&value.to_le_bytes());
            }
            DartReg::Tcr(sid) => st.regs.tcr[sid] = value,
            DartReg::Ttbr { sid, idx } => st.regs.ttbr[sid][idx] = value,
        }
    }

    fn write_tlb_op(&self, st: &mut InstanceState, value: u32) {
        if value & TLB_OP_INVALIDATE == 0 {
            st.regs.tlb_op = (value & !TLB_OP_BUSY) | (st.regs.tlb_op & TLB_OP_BUSY);
            return;
        }
        if st.regs.tlb_op & TLB_OP_BUSY != 0 {
            log::debug!("{}: TLB invalidate while busy ignored", self.name);
            return;
        }
        st.regs.tlb_op = value | TLB_OP_BUSY;
        self.invalidate(st);
        st.regs.tlb_op &= !(TLB_OP_BUSY | TLB_OP_INVALIDATE);
    }

    /// 失效 `sid_mask` 中的 stream：先通知 IOMMU 区域，再移除 TLB 条目
    fn invalidate(&self, st: &mut InstanceState) {
        let mask = st.regs.sid_mask & ((1 << DART_MAX_STREAMS) - 1);
        for (sid, region) in self.regions.iter().enumerate() {
            let Some(region) = region else {
                continue;
            };
            if mask & (1 << st.regs.stream(sid as u8)) != 0 {
                region.notify_unmap_all();
            }
        }
        let evicted = st.tlb.invalidate_streams(mask);
        st.stats.invalidations += 1;
        log::debug!(
            "{}: instance {} TLB invalidate mask {:#x}, {} entries evicted",
            self.name,
            self.index,
            mask,
            evicted
        );
    }

    // ========================================================================
    // 复位与状态查询
    // ========================================================================

    /// 复位寄存器并重建 TLB
    pub fn reset(&self) {
        let mut st = self.state.lock();
        st.regs = DartRegs::default();
        st.stub.clear();
        st.tlb = DartTlb::new(self.tlb_capacity);
        if self.kind == DartInstanceType::Dart {
            self.update_irq(&st);
        }
    }

    pub fn error_status(&self) -> u32 {
        self.state.lock().regs.error_status
    }

    pub fn error_address(&self) -> u64 {
        self.state.lock().regs.error_address
    }

    /// 获取统计信息
    pub fn stats(&self) -> DartStats {
        self.state.lock().stats.clone()
    }

    /// 获取TLB统计信息
    pub fn tlb_stats(&self) -> TlbStats {
        self.state.lock().tlb.get_stats()
    }
}

impl std::fmt::Debug for DartInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DartInstance")
            .field("name", &self.name)
            .field("index", &self.index)
            .field("kind", &self.kind)
            .finish()
    }
}
