use std::sync::Arc;

use clap::ValueEnum;
use log::{info, warn};
use serde::Serialize;

use crate::db::{AssetRecord, HashGroupRecord};
use crate::error::{Error, Result};
use crate::source::AssetSource;
use crate::store::HashGroupStore;

/// 重复分组的处理方式
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ResolveMode {
    /// 只保留画质最好的一张
    Merge,
    /// 删除整个分组
    DeleteAll,
}

/// 一个重复分组及其成员
#[derive(Debug, Clone, Serialize)]
pub struct DuplicateGroup {
    pub group: HashGroupRecord,
    /// 按拍摄时间和资源 ID 排序
    pub members: Vec<AssetRecord>,
}

/// 处理计划
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResolvePlan {
    /// 保留的资源
    pub kept: Option<String>,
    /// 将要删除的资源
    pub delete: Vec<String>,
}

/// 处理结果
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Resolution {
    /// 保留的资源
    pub kept: Option<String>,
    /// 已删除的资源
    pub deleted: Vec<String>,
    /// 因删除而变为空的分组
    #[serde(skip)]
    pub emptied_groups: Vec<HashGroupRecord>,
}

/// 从 (资源, 字节数) 中选出要保留的资源下标
///
/// 字节数严格更大时才替换，相同大小保留先出现的；无法读取大小的资源不参与选择
pub fn select_representative<T>(candidates: &[(T, Option<u64>)]) -> Option<usize> {
    let mut best: Option<(usize, u64)> = None;
    for (i, (_, size)) in candidates.iter().enumerate() {
        let Some(size) = *size else {
            continue;
        };
        match best {
            Some((_, best_size)) if size <= best_size => {}
            _ => best = Some((i, size)),
        }
    }
    best.map(|(i, _)| i)
}

/// 列出成员数量大于 1 的分组及其成员，按分组 ID 升序分页
pub async fn list_duplicate_groups(
    store: &HashGroupStore,
    limit: usize,
    after: Option<i64>,
) -> Result<Vec<DuplicateGroup>> {
    let summaries = store.list_groups_with_multiple_members(limit, after).await?;
    let mut groups = Vec::with_capacity(summaries.len());
    for summary in summaries {
        let members = store.group_members(summary.id).await?;
        groups.push(DuplicateGroup {
            group: HashGroupRecord { id: summary.id, hash: summary.hash },
            members,
        });
    }
    Ok(groups)
}

/// 重复分组处理器
pub struct Resolver<S> {
    source: Arc<S>,
    store: HashGroupStore,
}

impl<S: AssetSource> Resolver<S> {
    pub fn new(source: Arc<S>, store: HashGroupStore) -> Self {
        Self { source, store }
    }

    /// 列出成员数量大于 1 的分组，after 为上一页最后一个分组的 ID
    pub async fn list_groups(&self, limit: usize, after: Option<i64>) -> Result<Vec<DuplicateGroup>> {
        list_duplicate_groups(&self.store, limit, after).await
    }

    /// 根据分组 ID 读取分组
    pub async fn get_group(&self, group_id: i64) -> Result<Option<DuplicateGroup>> {
        let Some(group) = self.store.get_group(group_id).await? else {
            return Ok(None);
        };
        let members = self.store.group_members(group.id).await?;
        Ok(Some(DuplicateGroup { group, members }))
    }

    /// 决定保留哪个资源，删除哪些资源
    ///
    /// MERGE 会读取每个成员的大小，结果可以先展示给用户，确认后交给 `execute`
    pub async fn plan(&self, group: &DuplicateGroup, mode: ResolveMode) -> ResolvePlan {
        let ids = group.members.iter().map(|m| m.asset_id.clone());
        match mode {
            ResolveMode::DeleteAll => ResolvePlan { kept: None, delete: ids.collect() },
            ResolveMode::Merge => {
                let mut candidates = Vec::with_capacity(group.members.len());
                for asset_id in ids {
                    let size = match self.source.original_size(&asset_id).await {
                        Ok(size) => Some(size),
                        Err(e) => {
                            warn!("无法读取资源大小，保留该资源: {e}");
                            None
                        }
                    };
                    candidates.push((asset_id, size));
                }
                let Some(keep) = select_representative(&candidates) else {
                    return ResolvePlan::default();
                };
                let kept = candidates[keep].0.clone();
                let delete = candidates
                    .into_iter()
                    .enumerate()
                    .filter(|(i, (_, size))| *i != keep && size.is_some())
                    .map(|(_, (id, _))| id)
                    .collect();
                ResolvePlan { kept: Some(kept), delete }
            }
        }
    }

    /// 按照给定的计划删除资源
    ///
    /// 只有资源来源成功删除后才会删除存储中的记录；删除失败时存储保持不变
    pub async fn execute(&self, group: &DuplicateGroup, plan: ResolvePlan) -> Result<Resolution> {
        let ResolvePlan { kept, delete } = plan;
        if delete.is_empty() {
            info!("分组 {} 无需删除", group.group.hash);
            return Ok(Resolution { kept, ..Default::default() });
        }

        self.source.delete_batch(&delete).await.map_err(|e| match e {
            Error::AssetDeletion(_) => e,
            e => Error::AssetDeletion(e.to_string()),
        })?;

        let removed = self.store.remove_assets(&delete).await?;
        info!(
            "分组 {}: 删除 {} 个资源，保留 {:?}",
            group.group.hash, removed.removed, kept
        );

        Ok(Resolution { kept, deleted: delete, emptied_groups: removed.emptied_groups })
    }

    /// 生成计划并立即执行
    pub async fn resolve(&self, group: &DuplicateGroup, mode: ResolveMode) -> Result<Resolution> {
        let plan = self.plan(group, mode).await;
        self.execute(group, plan).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_largest() {
        let c = [("a", Some(100)), ("b", Some(500)), ("c", Some(300))];
        assert_eq!(select_representative(&c), Some(1));
    }

    #[test]
    fn test_select_tie_keeps_first() {
        let c = [("a", Some(300)), ("b", Some(500)), ("c", Some(500))];
        assert_eq!(select_representative(&c), Some(1));
    }

    #[test]
    fn test_select_skips_unknown() {
        let c = [("a", None), ("b", Some(1)), ("c", None)];
        assert_eq!(select_representative(&c), Some(1));
        let c: [(&str, Option<u64>); 2] = [("a", None), ("b", None)];
        assert_eq!(select_representative(&c), None);
        let c: [(&str, Option<u64>); 0] = [];
        assert_eq!(select_representative(&c), None);
    }

    #[test]
    fn test_select_zero_size() {
        let c = [("a", Some(0)), ("b", Some(0))];
        assert_eq!(select_representative(&c), Some(0));
    }
}
