use chrono::{DateTime, Utc};
use log::debug;

use crate::db::{self, AssetRecord, Database, GroupSummaryRecord, HashGroupRecord, crud};
use crate::error::{Error, Result};
use crate::phash::PHash;

/// 删除资源记录的结果
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RemovedAssets {
    /// 实际删除的资源记录数量
    pub removed: u64,
    /// 删除后变为空的分组，这些分组会被保留，由 `prune_empty_groups` 统一清理
    pub emptied_groups: Vec<HashGroupRecord>,
}

const HASHER_KEY: &str = "hasher";

fn check_hasher(stored: &str, requested: &str) -> Result<()> {
    if stored != requested {
        return Err(Error::HasherMismatch { stored: stored.to_owned(), requested: requested.to_owned() });
    }
    Ok(())
}

/// 哈希分组存储
///
/// 每个方法都是一次独立的持久化操作。多个调用之间的一致性
/// （先查后建）由调用方通过单写者约束保证。
#[derive(Clone)]
pub struct HashGroupStore {
    db: Database,
}

impl HashGroupStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// 打开数据库文件，不存在时创建
    pub async fn open(filename: impl AsRef<std::path::Path>) -> Result<Self> {
        Ok(Self::new(db::init_db(filename).await?))
    }

    pub async fn find_group(&self, hash: &PHash) -> Result<Option<HashGroupRecord>> {
        Ok(crud::find_group(&self.db, &hash.to_hex()).await?)
    }

    pub async fn get_group(&self, id: i64) -> Result<Option<HashGroupRecord>> {
        Ok(crud::get_group(&self.db, id).await?)
    }

    pub async fn create_group(&self, hash: &PHash) -> Result<HashGroupRecord> {
        Ok(crud::add_group(&self.db, &hash.to_hex()).await?)
    }

    pub async fn attach_asset(
        &self,
        asset_id: &str,
        captured_at: DateTime<Utc>,
        group: &HashGroupRecord,
    ) -> Result<AssetRecord> {
        Ok(crud::add_asset(&self.db, asset_id, captured_at, Some(group.id)).await?)
    }

    pub async fn asset_exists(&self, asset_id: &str) -> Result<bool> {
        Ok(crud::check_asset(&self.db, asset_id).await?)
    }

    pub async fn get_asset(&self, asset_id: &str) -> Result<Option<AssetRecord>> {
        Ok(crud::get_asset(&self.db, asset_id).await?)
    }

    /// 列出成员数量大于 1 的分组，按分组 ID 升序，从 after 之后开始
    pub async fn list_groups_with_multiple_members(
        &self,
        limit: usize,
        after: Option<i64>,
    ) -> Result<Vec<GroupSummaryRecord>> {
        Ok(crud::get_groups_with_duplicates(&self.db, after.unwrap_or(0), limit).await?)
    }

    pub async fn group_members(&self, group_id: i64) -> Result<Vec<AssetRecord>> {
        Ok(crud::get_group_members(&self.db, group_id).await?)
    }

    /// 在一个事务中删除资源记录，并找出因此变空的分组
    pub async fn remove_assets(&self, asset_ids: &[String]) -> Result<RemovedAssets> {
        let mut tx = self.db.begin().await?;
        let mut result = RemovedAssets::default();
        let mut touched = vec![];

        for asset_id in asset_ids {
            let Some(asset) = crud::get_asset(&mut *tx, asset_id).await? else {
                debug!("资源记录不存在，跳过删除: {asset_id}");
                continue;
            };
            result.removed += crud::delete_asset(&mut *tx, asset_id).await?;
            if let Some(group_id) = asset.group_id {
                if !touched.contains(&group_id) {
                    touched.push(group_id);
                }
            }
        }

        for group_id in touched {
            if crud::count_group_members(&mut *tx, group_id).await? == 0 {
                if let Some(group) = crud::get_group(&mut *tx, group_id).await? {
                    result.emptied_groups.push(group);
                }
            }
        }

        tx.commit().await?;
        Ok(result)
    }

    /// 删除没有成员的分组
    ///
    /// 调用后 BK 树中会残留这些哈希，需要重新写入索引
    pub async fn prune_empty_groups(&self) -> Result<Vec<HashGroupRecord>> {
        Ok(crud::delete_empty_groups(&self.db).await?)
    }

    /// 所有分组的哈希及其最早的成员
    pub async fn group_representatives(&self) -> Result<Vec<(PHash, Option<String>)>> {
        crud::get_group_representatives(&self.db)
            .await?
            .into_iter()
            .map(|r| {
                let hash = r
                    .hash
                    .parse::<PHash>()
                    .map_err(|_| Error::CorruptStore(format!("无效的分组哈希: {:?}", r.hash)))?;
                Ok((hash, r.asset_id))
            })
            .collect()
    }

    pub async fn load_index(&self) -> Result<Option<db::SerializedIndexRecord>> {
        Ok(crud::get_index(&self.db).await?)
    }

    /// 覆盖写入唯一的序列化索引
    pub async fn save_index(&self, blob: &[u8]) -> Result<()> {
        Ok(crud::upsert_index(&self.db, blob, Utc::now()).await?)
    }

    /// 建立数据时使用的哈希算法名称
    pub async fn hasher(&self) -> Result<Option<String>> {
        Ok(crud::get_setting(&self.db, HASHER_KEY).await?)
    }

    /// 检查哈希算法是否与数据库一致，数据库还没有记录时写入该算法
    pub async fn ensure_hasher(&self, name: &str) -> Result<()> {
        let stored = crud::init_setting(&self.db, HASHER_KEY, name).await?;
        check_hasher(&stored, name)
    }

    /// 只检查哈希算法是否一致，不写入
    pub async fn verify_hasher(&self, name: &str) -> Result<()> {
        match self.hasher().await? {
            Some(stored) => check_hasher(&stored, name),
            None => Ok(()),
        }
    }

    /// 返回 (资源数量, 分组数量, 索引行数)
    pub async fn count(&self) -> Result<(i64, i64, i64)> {
        Ok(crud::get_count(&self.db).await?)
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    async fn open_store() -> (TempDir, HashGroupStore) {
        let dir = TempDir::new().unwrap();
        let store = HashGroupStore::open(dir.path().join("test.db")).await.unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_create_and_find_group() {
        let (_dir, store) = open_store().await;
        let hash = PHash::from(0xabcd);
        assert!(store.find_group(&hash).await.unwrap().is_none());

        let group = store.create_group(&hash).await.unwrap();
        assert_eq!(group.hash, "000000000000abcd");
        assert_eq!(store.find_group(&hash).await.unwrap(), Some(group));
    }

    #[tokio::test]
    async fn test_duplicate_group_is_constraint_violation() {
        let (_dir, store) = open_store().await;
        let hash = PHash::from(1);
        store.create_group(&hash).await.unwrap();
        let err = store.create_group(&hash).await.unwrap_err();
        assert!(matches!(err, Error::StoreConstraintViolation(_)));
    }

    #[tokio::test]
    async fn test_duplicate_asset_is_constraint_violation() {
        let (_dir, store) = open_store().await;
        let group = store.create_group(&PHash::from(1)).await.unwrap();
        store.attach_asset("a", Utc::now(), &group).await.unwrap();
        assert!(store.asset_exists("a").await.unwrap());
        let err = store.attach_asset("a", Utc::now(), &group).await.unwrap_err();
        assert!(matches!(err, Error::StoreConstraintViolation(_)));
    }

    #[tokio::test]
    async fn test_list_groups_pagination() {
        let (_dir, store) = open_store().await;
        let now = Utc::now();
        for i in 0..5u64 {
            let group = store.create_group(&PHash::from(i)).await.unwrap();
            // 只有偶数分组有两个成员
            store.attach_asset(&format!("{i}-a"), now, &group).await.unwrap();
            if i % 2 == 0 {
                store.attach_asset(&format!("{i}-b"), now, &group).await.unwrap();
            }
        }

        let page = store.list_groups_with_multiple_members(2, None).await.unwrap();
        assert_eq!(page.len(), 2);
        assert!(page.iter().all(|g| g.member_count == 2));
        let next = store.list_groups_with_multiple_members(2, Some(page[1].id)).await.unwrap();
        assert_eq!(next.len(), 1);
        assert!(next[0].id > page[1].id);
    }

    #[tokio::test]
    async fn test_remove_assets_reports_empty_groups() {
        let (_dir, store) = open_store().await;
        let now = Utc::now();
        let g1 = store.create_group(&PHash::from(1)).await.unwrap();
        let g2 = store.create_group(&PHash::from(2)).await.unwrap();
        store.attach_asset("a", now, &g1).await.unwrap();
        store.attach_asset("b", now, &g2).await.unwrap();
        store.attach_asset("c", now, &g2).await.unwrap();

        let ids = vec!["a".to_owned(), "b".to_owned(), "missing".to_owned()];
        let removed = store.remove_assets(&ids).await.unwrap();
        assert_eq!(removed.removed, 2);
        assert_eq!(removed.emptied_groups, vec![g1.clone()]);

        // 空分组保留，直到显式清理
        assert!(store.find_group(&PHash::from(1)).await.unwrap().is_some());
        assert_eq!(store.prune_empty_groups().await.unwrap(), vec![g1]);
        assert!(store.find_group(&PHash::from(1)).await.unwrap().is_none());
        assert_eq!(store.group_members(g2.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_save_index_is_singleton() {
        let (_dir, store) = open_store().await;
        assert!(store.load_index().await.unwrap().is_none());
        store.save_index(b"one").await.unwrap();
        store.save_index(b"two").await.unwrap();
        assert_eq!(store.load_index().await.unwrap().unwrap().blob, b"two");
        assert_eq!(store.count().await.unwrap().2, 1);
    }

    #[tokio::test]
    async fn test_hasher_is_recorded_once() {
        let (_dir, store) = open_store().await;
        assert_eq!(store.hasher().await.unwrap(), None);
        store.verify_hasher("ahash").await.unwrap();
        assert_eq!(store.hasher().await.unwrap(), None);

        store.ensure_hasher("dhash").await.unwrap();
        store.ensure_hasher("dhash").await.unwrap();
        assert_eq!(store.hasher().await.unwrap().as_deref(), Some("dhash"));

        let err = store.ensure_hasher("ahash").await.unwrap_err();
        assert!(matches!(err, Error::HasherMismatch { .. }));
        let err = store.verify_hasher("ahash").await.unwrap_err();
        assert!(matches!(err, Error::HasherMismatch { .. }));
        assert_eq!(store.hasher().await.unwrap().as_deref(), Some("dhash"));
    }

    #[tokio::test]
    async fn test_invalid_group_hash_is_corrupt_store() {
        let (_dir, store) = open_store().await;
        crud::add_group(&store.db, "not-hex").await.unwrap();
        let err = store.group_representatives().await.unwrap_err();
        assert!(matches!(err, Error::CorruptStore(_)));
    }
}
