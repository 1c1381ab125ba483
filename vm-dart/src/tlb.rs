// TLB缓存管理
//
// 以 (stream << 53 | 页号) 为键缓存页表遍历结果。
// 条目只在显式失效（TLB_OP）或复位时移除，寄存器写入不会自动失效。

use crate::IommuPerm;
use std::collections::{HashMap, VecDeque};

/// stream 在组合键中的位置
const STREAM_KEY_SHIFT: u32 = 53;

/// 组合键
pub fn tlb_key(stream: u8, iova: u64) -> u64 {
    (u64::from(stream) << STREAM_KEY_SHIFT) | iova
}

/// 从组合键取出 stream
pub fn key_stream(key: u64) -> u8 {
    (key >> STREAM_KEY_SHIFT) as u8
}

/// TLB条目（一次成功页表遍历的结果）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TlbEntry {
    /// 页对齐的物理地址
    pub pa: u64,
    /// 访问权限
    pub perm: IommuPerm,
}

/// DART TLB
pub struct DartTlb {
    /// TLB条目
    entries: HashMap<u64, TlbEntry>,
    /// 插入顺序（用于容量淘汰）
    order: VecDeque<u64>,
    /// 最大条目数
    max_entries: usize,
    /// 命中统计
    hit_count: u64,
    /// 未命中统计
    miss_count: u64,
}

impl DartTlb {
    /// 创建新的TLB
    ///
    /// # 参数
    /// - `max_entries`: 最大条目数，超出后淘汰最早插入的条目
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            max_entries: max_entries.max(1),
            hit_count: 0,
            miss_count: 0,
        }
    }

    /// 查找TLB条目
    ///
    /// # 返回
    /// - `Some(entry)`: TLB命中
    /// - `None`: TLB未命中
    pub fn lookup(&mut self, stream: u8, iova: u64) -> Option<TlbEntry> {
        match self.entries.get(&tlb_key(stream, iova)) {
            Some(entry) => {
                self.hit_count += 1;
                log::trace!("DART TLB hit: stream={} iova={:#x}", stream, iova);
                Some(*entry)
            }
            None => {
                self.miss_count += 1;
                log::trace!("DART TLB miss: stream={} iova={:#x}", stream, iova);
                None
            }
        }
    }

    /// 插入TLB条目
    pub fn insert(&mut self, stream: u8, iova: u64, entry: TlbEntry) {
        let key = tlb_key(stream, iova);
        if self.entries.insert(key, entry).is_some() {
            return;
        }
        self.order.push_back(key);
        while self.entries.len() > self.max_entries {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            self.entries.remove(&oldest);
        }
    }

    /// 使 `stream_mask` 中所有 stream 的条目失效
    ///
    /// # 返回
    /// 移除的条目数
    pub fn invalidate_streams(&mut self, stream_mask: u32) -> usize {
        let in_mask = |key: &u64| stream_mask & (1 << (key_stream(*key) & 0x1f)) != 0;
        let before = self.entries.len();
        self.entries.retain(|key, _| !in_mask(key));
        self.order.retain(|key| !in_mask(key));
        before - self.entries.len()
    }

    /// 获取当前大小
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// 判断是否为空
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 获取TLB统计信息
    pub fn get_stats(&self) -> TlbStats {
        let total_lookups = self.hit_count + self.miss_count;
        let hit_rate = if total_lookups > 0 {
            self.hit_count as f64 / total_lookups as f64
        } else {
            0.0
        };

        TlbStats {
            total_lookups,
            hit_count: self.hit_count,
            miss_count: self.miss_count,
            hit_rate,
            current_size: self.entries.len(),
            max_capacity: self.max_entries,
        }
    }
}

/// TLB统计信息
#[derive(Debug, Clone)]
pub struct TlbStats {
    /// 总查找次数
    pub total_lookups: u64,
    /// 命中次数
    pub hit_count: u64,
    /// 未命中次数
    pub miss_count: u64,
    /// 命中率
    pub hit_rate: f64,
    /// 当前大小
    pub current_size: usize,
    /// 最大容量
    pub max_capacity: usize,
}

impl std::fmt::Display for TlbStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "TLB统计信息")?;
        writeln!(f, "  总查找次数: {}", self.total_lookups)?;
        writeln!(f, "  命中次数: {}", self.hit_count)?;
        writeln!(f, "  未命中次数: {}", self.miss_count)?;
        writeln!(f, "  命中率: {:.2}%", self.hit_rate * 100.0)?;
        writeln!(f, "  当前大小: {}/{}", self.current_size, self.max_capacity)
    }
}
