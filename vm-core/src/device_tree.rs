//! 设备树属性
//!
//! 设备树的文本/二进制解析不在本库范围内；这里只保存已经解析好的节点
//! 属性（原始字节），并提供按小端解码的类型化访问。

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 设备树节点
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceTreeNode {
    /// 节点名
    pub name: String,
    /// 属性表
    pub props: BTreeMap<String, Vec<u8>>,
}

impl DeviceTreeNode {
    /// 创建空节点
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            props: BTreeMap::new(),
        }
    }

    /// 设置原始属性
    pub fn set_prop(&mut self, name: &str, value: Vec<u8>) -> &mut Self {
        self.props.insert(name.to_string(), value);
        self
    }

    /// 设置 32 位属性
    pub fn set_u32(&mut self, name: &str, value: u32) -> &mut Self {
        self.set_prop(name, value.to_le_bytes().to_vec())
    }

    /// 设置 64 位属性
    pub fn set_u64(&mut self, name: &str, value: u64) -> &mut Self {
        self.set_prop(name, value.to_le_bytes().to_vec())
    }

    /// 设置 32 位数组属性
    pub fn set_u32_array(&mut self, name: &str, values: &[u32]) -> &mut Self {
        let bytes = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        self.set_prop(name, bytes)
    }

    /// 设置字符串列表属性（以 NUL 分隔）
    pub fn set_str_list(&mut self, name: &str, values: &[&str]) -> &mut Self {
        let mut bytes = Vec::new();
        for v in values {
            bytes.extend_from_slice(v.as_bytes());
            bytes.push(0);
        }
        self.set_prop(name, bytes)
    }

    /// 设置 `reg` 属性（64 位 base/size 对）
    pub fn set_reg(&mut self, regions: &[(u64, u64)]) -> &mut Self {
        let bytes = regions
            .iter()
            .flat_map(|(base, size)| base.to_le_bytes().into_iter().chain(size.to_le_bytes()))
            .collect();
        self.set_prop("reg", bytes)
    }

    /// 原始属性
    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.props.get(name).map(Vec::as_slice)
    }

    /// 读取 32 位属性（取前 4 字节）
    pub fn get_u32(&self, name: &str) -> Option<u32> {
        let bytes = self.get(name)?;
        let word: [u8; 4] = bytes.get(..4)?.try_into().ok()?;
        Some(u32::from_le_bytes(word))
    }

    /// 读取 64 位属性；4 字节属性按零扩展处理
    pub fn get_u64(&self, name: &str) -> Option<u64> {
        let bytes = self.get(name)?;
        if let Some(dword) = bytes.get(..8) {
            let dword: [u8; 8] = dword.try_into().ok()?;
            return Some(u64::from_le_bytes(dword));
        }
        self.get_u32(name).map(u64::from)
    }

    /// 读取 32 位数组属性；尾部不足 4 字节的部分被忽略
    pub fn get_u32_array(&self, name: &str) -> Option<Vec<u32>> {
        let bytes = self.get(name)?;
        Some(
            bytes
                .chunks_exact(4)
                .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect(),
        )
    }

    /// 读取字符串列表属性
    pub fn get_str_list(&self, name: &str) -> Option<Vec<String>> {
        let bytes = self.get(name)?;
        Some(
            bytes
                .split(|b| *b == 0)
                .filter(|s| !s.is_empty())
                .map(|s| String::from_utf8_lossy(s).into_owned())
                .collect(),
        )
    }

    /// 读取 `reg` 属性
    pub fn get_reg(&self) -> Vec<(u64, u64)> {
        let Some(bytes) = self.get("reg") else {
            return Vec::new();
        };
        bytes
            .chunks_exact(16)
            .map(|c| {
                let mut base = [0u8; 8];
                let mut size = [0u8; 8];
                base.copy_from_slice(&c[..8]);
                size.copy_from_slice(&c[8..]);
                (u64::from_le_bytes(base), u64::from_le_bytes(size))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_props() {
        let mut node = DeviceTreeNode::new("dart-ans");
        node.set_u32("page-size", 0x4000)
            .set_u64("bypass-address", 0x8_0000_0000);
        assert_eq!(node.get_u32("page-size"), Some(0x4000));
        assert_eq!(node.get_u64("page-size"), Some(0x4000));
        assert_eq!(node.get_u64("bypass-address"), Some(0x8_0000_0000));
        assert_eq!(node.get_u32("missing"), None);
    }

    #[test]
    fn test_short_prop() {
        let mut node = DeviceTreeNode::new("n");
        node.set_prop("short", vec![1, 2]);
        assert_eq!(node.get_u32("short"), None);
        assert_eq!(node.get_u64("short"), None);
    }

    #[test]
    fn test_array_and_strings() {
        let mut node = DeviceTreeNode::new("aic");
        node.set_u32_array("ipid-mask", &[0xffff_ffff; 3])
            .set_str_list("instance", &["DART", "SMMU"]);
        assert_eq!(node.get_u32_array("ipid-mask").map(|v| v.len()), Some(3));
        assert_eq!(
            node.get_str_list("instance"),
            Some(vec!["DART".to_string(), "SMMU".to_string()])
        );
    }

    #[test]
    fn test_reg() {
        let mut node = DeviceTreeNode::new("dart");
        node.set_reg(&[(0x2_3500_0000, 0x4000), (0x2_3500_4000, 0x4000)]);
        assert_eq!(
            node.get_reg(),
            vec![(0x2_3500_0000, 0x4000), (0x2_3500_4000, 0x4000)]
        );
        assert!(DeviceTreeNode::new("empty").get_reg().is_empty());
    }
}
