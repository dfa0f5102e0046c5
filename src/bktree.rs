use std::collections::{BTreeMap, BTreeSet};

use bincode::Options;
use log::debug;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::phash::PHash;

/// 序列化数据的文件头
const MAGIC: &[u8; 4] = b"BKTR";
/// 序列化格式版本，格式变化时递增
const FORMAT_VERSION: u32 = 2;

/// 度量空间中的距离，必须满足对称性和三角不等式，否则 BK 树的剪枝会漏掉结果
pub trait Metric {
    fn distance(&self, other: &Self) -> u32;
}

impl Metric for PHash {
    fn distance(&self, other: &Self) -> u32 {
        PHash::distance(self, other)
    }
}

/// 节点元数据中记录的 key，反序列化时用来检查元数据与节点是否一致
pub trait NodeMeta<K> {
    fn key(&self) -> &K;
}

/// BK 树中的节点元数据：节点哈希以及第一次见到该哈希时的资源 ID
///
/// 扫描在建组后、写入资源前中断时，分组没有成员，此时 asset_id 为空
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub hash: PHash,
    pub asset_id: Option<String>,
}

impl NodeMeta<PHash> for IndexEntry {
    fn key(&self) -> &PHash {
        &self.hash
    }
}

pub type HashIndex = BKTree<PHash, IndexEntry>;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Node<K, M> {
    key: K,
    meta: M,
    /// 边的距离 => 子节点在 nodes 中的下标
    children: BTreeMap<u32, u32>,
}

/// 基于汉明距离等度量的 BK 树
///
/// 节点存放在一个数组中，0 号节点为根，子节点总是排在父节点之后。
/// 树不做任何平衡，深度取决于插入顺序。
#[derive(Debug, Clone)]
pub struct BKTree<K, M> {
    nodes: Vec<Node<K, M>>,
}

impl<K, M> Default for BKTree<K, M> {
    fn default() -> Self {
        Self { nodes: vec![] }
    }
}

impl<K: Metric, M> BKTree<K, M> {
    pub fn new() -> Self {
        Self::default()
    }

    /// 节点数量，即不同 key 的数量
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// 插入一个新的 key
    ///
    /// 调用方需要保证 key 尚未存在；如果已经存在则不做任何修改并返回 false
    pub fn insert(&mut self, key: K, meta: M) -> bool {
        if self.nodes.is_empty() {
            self.nodes.push(Node { key, meta, children: BTreeMap::new() });
            return true;
        }

        let new_idx = self.nodes.len() as u32;
        let mut cur = 0;
        loop {
            let d = key.distance(&self.nodes[cur].key);
            if d == 0 {
                debug!("BK 树中已存在相同的 key，忽略插入");
                return false;
            }
            match self.nodes[cur].children.get(&d) {
                Some(&child) => cur = child as usize,
                None => {
                    self.nodes[cur].children.insert(d, new_idx);
                    break;
                }
            }
        }
        self.nodes.push(Node { key, meta, children: BTreeMap::new() });
        true
    }

    /// 查找距离不超过 max_distance 的所有节点，按距离分组返回元数据
    pub fn query(&self, key: &K, max_distance: u32) -> BTreeMap<u32, Vec<&M>> {
        let mut result: BTreeMap<u32, Vec<&M>> = BTreeMap::new();
        if self.nodes.is_empty() {
            return result;
        }

        // 树可能很深，这里用显式栈代替递归
        let mut stack = vec![0u32];
        while let Some(idx) = stack.pop() {
            let node = &self.nodes[idx as usize];
            let d0 = key.distance(&node.key);
            if d0 <= max_distance {
                result.entry(d0).or_default().push(&node.meta);
            }
            // 三角不等式：只有 |e - d0| <= max_distance 的子树可能包含结果
            let lo = d0.saturating_sub(max_distance);
            let hi = d0.saturating_add(max_distance);
            stack.extend(node.children.range(lo..=hi).map(|(_, &child)| child));
        }

        result
    }

    /// 检查 key 是否已经在树中
    pub fn contains(&self, key: &K) -> bool {
        !self.query(key, 0).is_empty()
    }

    /// 按插入顺序遍历所有节点
    pub fn iter(&self) -> impl Iterator<Item = (&K, &M)> {
        self.nodes.iter().map(|node| (&node.key, &node.meta))
    }
}

#[derive(Serialize)]
struct WireRef<'a, K, M> {
    nodes: &'a [Node<K, M>],
}

#[derive(Deserialize)]
struct WireOwned<K, M> {
    nodes: Vec<Node<K, M>>,
}

/// 与 bincode 1.x 默认的定长编码一致，但不允许尾部多余的字节
fn wire_options() -> impl Options {
    bincode::DefaultOptions::new().with_fixint_encoding().reject_trailing_bytes()
}

impl<K, M> BKTree<K, M>
where
    K: Metric + Ord + Serialize + DeserializeOwned,
    M: NodeMeta<K> + Serialize + DeserializeOwned,
{
    /// 序列化为字节串
    ///
    /// 格式：4 字节魔数 `BKTR`，4 字节小端版本号，然后是 bincode 编码的节点数组
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let body = wire_options()
            .serialize(&WireRef { nodes: &self.nodes })
            .map_err(|e| Error::Io(std::io::Error::other(e)))?;
        let mut blob = Vec::with_capacity(8 + body.len());
        blob.extend_from_slice(MAGIC);
        blob.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        blob.extend_from_slice(&body);
        Ok(blob)
    }

    /// 从字节串恢复，并校验树的结构
    pub fn deserialize(blob: &[u8]) -> Result<Self> {
        if blob.len() < 8 || &blob[..4] != MAGIC {
            return Err(Error::CorruptIndex("缺少文件头".to_owned()));
        }
        let mut version = [0u8; 4];
        version.copy_from_slice(&blob[4..8]);
        let version = u32::from_le_bytes(version);
        if version != FORMAT_VERSION {
            return Err(Error::CorruptIndex(format!("不支持的版本: {version}")));
        }

        let wire: WireOwned<K, M> = wire_options()
            .deserialize(&blob[8..])
            .map_err(|e| Error::CorruptIndex(e.to_string()))?;
        let tree = Self { nodes: wire.nodes };
        tree.validate()?;
        Ok(tree)
    }

    fn validate(&self) -> Result<()> {
        let len = self.nodes.len();
        let mut has_parent = vec![false; len];
        let mut keys = BTreeSet::new();
        for (idx, node) in self.nodes.iter().enumerate() {
            if node.meta.key() != &node.key {
                return Err(Error::CorruptIndex(format!("节点 {idx} 的元数据与 key 不一致")));
            }
            if !keys.insert(&node.key) {
                return Err(Error::CorruptIndex(format!("节点 {idx} 的 key 重复")));
            }
            for (&edge, &child) in &node.children {
                let child = child as usize;
                // 子节点总在父节点之后，保证无环
                if child <= idx || child >= len {
                    return Err(Error::CorruptIndex(format!("节点 {idx} 的子节点下标 {child} 非法")));
                }
                if std::mem::replace(&mut has_parent[child], true) {
                    return Err(Error::CorruptIndex(format!("节点 {child} 有多个父节点")));
                }
                let d = node.key.distance(&self.nodes[child].key);
                if edge == 0 || d != edge {
                    return Err(Error::CorruptIndex(format!(
                        "节点 {idx} -> {child} 的边距离为 {edge}，实际为 {d}"
                    )));
                }
            }
        }
        if has_parent.iter().skip(1).any(|p| !p) {
            return Err(Error::CorruptIndex("存在不可达的节点".to_owned()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(v: u64) -> (PHash, IndexEntry) {
        let hash = PHash::from(v);
        (hash, IndexEntry { hash, asset_id: Some(format!("asset-{v}")) })
    }

    fn build(values: &[u64]) -> HashIndex {
        let mut tree = HashIndex::new();
        for &v in values {
            let (k, m) = entry(v);
            tree.insert(k, m);
        }
        tree
    }

    #[test]
    fn test_empty_tree() {
        let tree = HashIndex::new();
        assert!(tree.is_empty());
        assert!(tree.query(&PHash::from(0), 64).is_empty());
    }

    #[test]
    fn test_first_insert_becomes_root() {
        let tree = build(&[0b1111]);
        assert_eq!(tree.len(), 1);
        let r = tree.query(&PHash::from(0b1111), 0);
        assert_eq!(r[&0][0].asset_id.as_deref(), Some("asset-15"));
    }

    #[test]
    fn test_duplicate_insert_is_rejected() {
        let mut tree = build(&[1, 2]);
        let (k, m) = entry(2);
        assert!(!tree.insert(k, m));
        assert_eq!(tree.len(), 2);
    }

    #[test]
    fn test_query_groups_by_distance() {
        // 与 0 的距离分别为 1, 1, 2, 9
        let tree = build(&[0b1, 0b10, 0b11, 0x1ff]);
        let r = tree.query(&PHash::from(0), 5);
        assert_eq!(r.keys().copied().collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(r[&1].len(), 2);
        assert_eq!(r[&2][0].asset_id.as_deref(), Some("asset-3"));
    }

    #[test]
    fn test_query_zero_returns_exact_match() {
        let tree = build(&[0, 1, 3, 7, 15, 31]);
        for v in [0u64, 1, 3, 7, 15, 31] {
            let r = tree.query(&PHash::from(v), 0);
            assert_eq!(r.len(), 1);
            assert_eq!(r[&0].len(), 1);
            assert_eq!(r[&0][0].hash, PHash::from(v));
        }
        assert!(tree.query(&PHash::from(2), 0).is_empty());
        assert!(tree.contains(&PHash::from(7)));
        assert!(!tree.contains(&PHash::from(8)));
    }

    #[test]
    fn test_serialize_round_trip() {
        let tree = build(&[0, 0xff, 0xf0f0, 1, 0xffff_ffff, 3]);
        let blob = tree.serialize().unwrap();
        assert_eq!(&blob[..4], b"BKTR");
        let restored = HashIndex::deserialize(&blob).unwrap();
        assert_eq!(restored.len(), tree.len());
        for q in [0u64, 2, 0xff, 0xffff] {
            for dist in [0, 3, 10, 64] {
                assert_eq!(tree.query(&PHash::from(q), dist), restored.query(&PHash::from(q), dist));
            }
        }
    }

    #[test]
    fn test_serialize_empty_round_trip() {
        let blob = HashIndex::new().serialize().unwrap();
        assert!(HashIndex::deserialize(&blob).unwrap().is_empty());
    }

    #[test]
    fn test_deserialize_rejects_garbage() {
        assert!(matches!(HashIndex::deserialize(b""), Err(Error::CorruptIndex(_))));
        assert!(matches!(HashIndex::deserialize(b"hello world"), Err(Error::CorruptIndex(_))));

        let mut blob = build(&[0, 1]).serialize().unwrap();
        blob[4] = 99;
        assert!(matches!(HashIndex::deserialize(&blob), Err(Error::CorruptIndex(_))));

        let mut blob = build(&[0, 1, 3]).serialize().unwrap();
        blob.truncate(blob.len() - 3);
        assert!(matches!(HashIndex::deserialize(&blob), Err(Error::CorruptIndex(_))));
    }

    #[test]
    fn test_deserialize_rejects_wrong_edge() {
        let mut tree = build(&[0, 1]);
        // 手动破坏边的距离
        let child = tree.nodes[0].children.remove(&1).unwrap();
        tree.nodes[0].children.insert(5, child);
        let blob = tree.serialize().unwrap();
        assert!(matches!(HashIndex::deserialize(&blob), Err(Error::CorruptIndex(_))));
    }

    #[test]
    fn test_deserialize_rejects_trailing_bytes() {
        let mut blob = build(&[0, 1, 3]).serialize().unwrap();
        blob.extend_from_slice(b"trailer");
        assert!(matches!(HashIndex::deserialize(&blob), Err(Error::CorruptIndex(_))));
    }

    #[test]
    fn test_deserialize_rejects_meta_key_mismatch() {
        let mut tree = build(&[0, 1]);
        tree.nodes[0].meta.hash = PHash::from(u64::MAX);
        let blob = tree.serialize().unwrap();
        assert!(matches!(HashIndex::deserialize(&blob), Err(Error::CorruptIndex(_))));
    }

    #[test]
    fn test_deserialize_rejects_duplicate_keys() {
        // 0b11 在两棵不同的子树中各出现一次，边的距离都是正确的
        let mut tree = build(&[0, 0b1, 0b111]);
        let (k, m) = entry(0b11);
        tree.nodes.push(Node { key: k, meta: m.clone(), children: BTreeMap::new() });
        tree.nodes.push(Node { key: k, meta: m, children: BTreeMap::new() });
        // 0 -> 0b1 (1), 0 -> 0b111 (3), 0b1 -> 0b11 (1), 0b111 -> 0b11 (1)
        tree.nodes[1].children.insert(1, 3);
        tree.nodes[2].children.insert(1, 4);
        let blob = tree.serialize().unwrap();
        assert!(matches!(HashIndex::deserialize(&blob), Err(Error::CorruptIndex(_))));
    }
}
