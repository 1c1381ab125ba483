// IOMMU区域
//
// 外设模型（NVMe、显示、PCIe）通过 IommuRegion 发起 DMA。
// 每个 (实例, stream) 对应一个区域，转换请求同步进入实例的转换入口；
// TLB 失效时，区域上注册的观察者在实例锁内收到 UNMAP 通知。

use crate::instance::DartInstance;
use crate::IommuPerm;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use vm_core::{GuestPhysAddr, MemoryAccess, MemoryError, VmResult};

/// 一次转换的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IommuTlbEntry {
    /// 块对齐的设备地址
    pub iova: u64,
    /// 块对齐的目标物理地址
    pub translated_addr: u64,
    /// 块内偏移掩码
    pub addr_mask: u64,
    /// 访问权限
    pub perm: IommuPerm,
}

impl IommuTlbEntry {
    /// 覆盖整个地址空间、无权限的条目
    pub fn unmap_all() -> Self {
        Self {
            iova: 0,
            translated_addr: 0,
            addr_mask: u64::MAX,
            perm: IommuPerm::None,
        }
    }

    /// 设备地址 `addr` 对应的目标物理地址
    pub fn target(&self, addr: u64) -> u64 {
        self.translated_addr.wrapping_add(addr & self.addr_mask)
    }
}

/// IOMMU 事件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IommuEvent {
    /// 映射被移除
    Unmap(IommuTlbEntry),
}

/// IOMMU 事件观察者
///
/// 通知在实例锁内同步投递，观察者不能回头对同一实例发起转换。
pub trait IommuNotifier: Send + Sync {
    fn notify(&self, event: &IommuEvent);
}

impl<F> IommuNotifier for F
where
    F: Fn(&IommuEvent) + Send + Sync,
{
    fn notify(&self, event: &IommuEvent) {
        self(event)
    }
}

/// 观察者注册句柄
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NotifierHandle(u64);

/// IOMMU区域
pub struct IommuRegion {
    /// 区域名
    name: String,
    /// 逻辑 stream ID
    sid: u8,
    /// 所属实例
    instance: Weak<DartInstance>,
    /// DMA 目标内存
    memory: Arc<dyn MemoryAccess>,
    /// 已注册的观察者
    notifiers: Mutex<Vec<(NotifierHandle, Arc<dyn IommuNotifier>)>>,
    next_handle: AtomicU64,
}

impl IommuRegion {
    pub(crate) fn new(
        name: String,
        sid: u8,
        instance: Weak<DartInstance>,
        memory: Arc<dyn MemoryAccess>,
    ) -> Self {
        Self {
            name,
            sid,
            instance,
            memory,
            notifiers: Mutex::new(Vec::new()),
            next_handle: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sid(&self) -> u8 {
        self.sid
    }

    /// 转换设备地址
    ///
    /// # 参数
    /// - `addr`: 设备地址
    /// - `flags`: 请求的访问权限
    ///
    /// 实例已销毁时返回无权限条目。
    pub fn translate(&self, addr: u64, flags: IommuPerm) -> IommuTlbEntry {
        match self.instance.upgrade() {
            Some(instance) => instance.translate(self.sid, addr, flags),
            None => {
                log::warn!("{}: translate after instance teardown", self.name);
                IommuTlbEntry {
                    iova: addr,
                    translated_addr: 0,
                    addr_mask: 0,
                    perm: IommuPerm::None,
                }
            }
        }
    }

    /// 注册观察者
    pub fn register_notifier(&self, notifier: Arc<dyn IommuNotifier>) -> NotifierHandle {
        let handle = NotifierHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        self.notifiers.lock().push((handle, notifier));
        handle
    }

    /// 注销观察者
    ///
    /// # 返回
    /// 句柄是否存在
    pub fn unregister_notifier(&self, handle: NotifierHandle) -> bool {
        let mut notifiers = self.notifiers.lock();
        let before = notifiers.len();
        notifiers.retain(|(h, _)| *h != handle);
        notifiers.len() != before
    }

    pub fn notifier_count(&self) -> usize {
        self.notifiers.lock().len()
    }

    /// 向全部观察者投递覆盖整个地址空间的 UNMAP
    pub(crate) fn notify_unmap_all(&self) {
        let notifiers: Vec<_> = self
            .notifiers
            .lock()
            .iter()
            .map(|(_, n)| Arc::clone(n))
            .collect();
        let event = IommuEvent::Unmap(IommuTlbEntry::unmap_all());
        for notifier in notifiers {
            notifier.notify(&event);
        }
    }

    /// 经 IOMMU 读取设备地址空间
    ///
    /// 按转换块切分访问，任一块权限不足时返回 `TranslationFault`。
    pub fn dma_read(&self, iova: u64, buf: &mut [u8]) -> VmResult<()> {
        let mut done = 0;
        while done < buf.len() {
            let addr = iova.wrapping_add(done as u64);
            let (pa, len) = self.map_chunk(addr, buf.len() - done, IommuPerm::ReadOnly)?;
            self.memory.read_bulk(pa, &mut buf[done..done + len])?;
            done += len;
        }
        Ok(())
    }

    /// 经 IOMMU 写入设备地址空间
    pub fn dma_write(&self, iova: u64, buf: &[u8]) -> VmResult<()> {
        let mut done = 0;
        while done < buf.len() {
            let addr = iova.wrapping_add(done as u64);
            let (pa, len) = self.map_chunk(addr, buf.len() - done, IommuPerm::WriteOnly)?;
            self.memory.write_bulk(pa, &buf[done..done + len])?;
            done += len;
        }
        Ok(())
    }

    fn map_chunk(
        &self,
        addr: u64,
        remaining: usize,
        perm: IommuPerm,
    ) -> VmResult<(GuestPhysAddr, usize)> {
        let entry = self.translate(addr, perm);
        if !entry.perm.allows(perm) {
            return Err(MemoryError::TranslationFault { iova: addr }.into());
        }
        let in_block = (entry.addr_mask - (addr & entry.addr_mask)).saturating_add(1);
        let len = usize::try_from(in_block).map_or(remaining, |n| n.min(remaining));
        Ok((GuestPhysAddr(entry.target(addr)), len))
    }
}

impl std::fmt::Debug for IommuRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IommuRegion")
            .field("name", &self.name)
            .field("sid", &self.sid)
            .field("notifiers", &self.notifier_count())
            .finish()
    }
}
