use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::{Arc, PoisonError, RwLock};

use log::debug;
use serde::Serialize;
use tokio::task::spawn_blocking;

use crate::bktree::HashIndex;
use crate::db::AssetRecord;
use crate::error::{Error, Result};
use crate::phash::{PHash, PerceptualHasher};
use crate::store::HashGroupStore;

/// 某个距离上找到的相似图片
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchHit {
    pub distance: u32,
    pub members: Vec<AssetRecord>,
}

/// 相似图片搜索
///
/// 只读取索引和存储，不做任何修改
pub struct SimilaritySearch {
    store: HashGroupStore,
    index: Arc<RwLock<HashIndex>>,
    hasher: Arc<dyn PerceptualHasher>,
}

impl SimilaritySearch {
    pub fn new(
        store: HashGroupStore,
        index: Arc<RwLock<HashIndex>>,
        hasher: Arc<dyn PerceptualHasher>,
    ) -> Self {
        Self { store, index, hasher }
    }

    /// 搜索与图片相似的资源，按距离升序
    ///
    /// 哈希算法与数据库不一致时返回 `HasherMismatch`
    pub async fn search(&self, image: Vec<u8>, max_distance: u32) -> Result<Vec<SearchHit>> {
        self.store.verify_hasher(self.hasher.name()).await?;
        let hasher = self.hasher.clone();
        let hash = spawn_blocking(move || hasher.compute_hash(&image))
            .await
            .map_err(|e| Error::HashComputation(e.to_string()))??;
        debug!("查询图片哈希: {hash}");
        self.search_hash(&hash, max_distance).await
    }

    /// 搜索与哈希相近的资源，按距离升序，跳过没有任何成员的距离
    pub async fn search_hash(&self, hash: &PHash, max_distance: u32) -> Result<Vec<SearchHit>> {
        // 先在锁内收集结果，查询存储时不持有锁
        let buckets: BTreeMap<u32, BTreeSet<PHash>> = {
            let index = self.index.read().unwrap_or_else(PoisonError::into_inner);
            index
                .query(hash, max_distance)
                .into_iter()
                .map(|(d, entries)| (d, entries.into_iter().map(|e| e.hash).collect()))
                .collect()
        };

        let mut hits = vec![];
        for (distance, hashes) in buckets {
            let mut seen = HashSet::new();
            let mut members = vec![];
            for hash in hashes {
                let Some(group) = self.store.find_group(&hash).await? else {
                    continue;
                };
                for member in self.store.group_members(group.id).await? {
                    if seen.insert(member.asset_id.clone()) {
                        members.push(member);
                    }
                }
            }
            if !members.is_empty() {
                hits.push(SearchHit { distance, members });
            }
        }

        Ok(hits)
    }
}
