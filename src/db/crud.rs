use chrono::{DateTime, Utc};
use sqlx::{Executor, Result, Sqlite};

use super::{
    AssetRecord, GroupRepresentativeRecord, GroupSummaryRecord, HashGroupRecord,
    SerializedIndexRecord,
};

/// 根据哈希查找分组
pub async fn find_group<'c, E>(executor: E, hash: &str) -> Result<Option<HashGroupRecord>>
where
    E: Executor<'c, Database = Sqlite>,
{
    sqlx::query_as::<_, HashGroupRecord>(
        r#"
        SELECT id, hash FROM hash_group WHERE hash = ?
        "#,
    )
    .bind(hash)
    .fetch_optional(executor)
    .await
}

/// 根据 ID 查找分组
pub async fn get_group<'c, E>(executor: E, id: i64) -> Result<Option<HashGroupRecord>>
where
    E: Executor<'c, Database = Sqlite>,
{
    sqlx::query_as::<_, HashGroupRecord>(
        r#"
        SELECT id, hash FROM hash_group WHERE id = ?
        "#,
    )
    .bind(id)
    .fetch_optional(executor)
    .await
}

/// 添加分组，哈希重复时返回唯一约束错误
pub async fn add_group<'c, E>(executor: E, hash: &str) -> Result<HashGroupRecord>
where
    E: Executor<'c, Database = Sqlite>,
{
    sqlx::query_as::<_, HashGroupRecord>(
        r#"
        INSERT INTO hash_group (hash)
        VALUES (?)
        RETURNING id, hash
        "#,
    )
    .bind(hash)
    .fetch_one(executor)
    .await
}

/// 添加资源记录，资源 ID 重复时返回唯一约束错误
pub async fn add_asset<'c, E>(
    executor: E,
    asset_id: &str,
    captured_at: DateTime<Utc>,
    group_id: Option<i64>,
) -> Result<AssetRecord>
where
    E: Executor<'c, Database = Sqlite>,
{
    sqlx::query_as::<_, AssetRecord>(
        r#"
        INSERT INTO asset (asset_id, captured_at, group_id)
        VALUES (?, ?, ?)
        RETURNING id, asset_id, captured_at, group_id
        "#,
    )
    .bind(asset_id)
    .bind(captured_at)
    .bind(group_id)
    .fetch_one(executor)
    .await
}

/// 检查资源是否已经记录
pub async fn check_asset<'c, E>(executor: E, asset_id: &str) -> Result<bool>
where
    E: Executor<'c, Database = Sqlite>,
{
    let (count,): (i64,) = sqlx::query_as(
        r#"
        SELECT COUNT(*) FROM asset WHERE asset_id = ?
        "#,
    )
    .bind(asset_id)
    .fetch_one(executor)
    .await?;

    Ok(count > 0)
}

/// 获取 ID 大于 after 且成员数量大于 1 的分组，按 ID 升序
pub async fn get_groups_with_duplicates<'c, E>(
    executor: E,
    after: i64,
    limit: usize,
) -> Result<Vec<GroupSummaryRecord>>
where
    E: Executor<'c, Database = Sqlite>,
{
    let limit = limit as i64;
    sqlx::query_as::<_, GroupSummaryRecord>(
        r#"
        SELECT hash_group.id AS id, hash_group.hash AS hash, COUNT(asset.id) AS member_count
        FROM hash_group
        JOIN asset ON asset.group_id = hash_group.id
        WHERE hash_group.id > ?
        GROUP BY hash_group.id
        HAVING COUNT(asset.id) > 1
        ORDER BY hash_group.id ASC
        LIMIT ?
        "#,
    )
    .bind(after)
    .bind(limit)
    .fetch_all(executor)
    .await
}

/// 获取分组的所有成员，按拍摄时间和资源 ID 排序
pub async fn get_group_members<'c, E>(executor: E, group_id: i64) -> Result<Vec<AssetRecord>>
where
    E: Executor<'c, Database = Sqlite>,
{
    sqlx::query_as::<_, AssetRecord>(
        r#"
        SELECT id, asset_id, captured_at, group_id FROM asset
        WHERE group_id = ?
        ORDER BY captured_at ASC, asset_id ASC
        "#,
    )
    .bind(group_id)
    .fetch_all(executor)
    .await
}

/// 获取资源记录
pub async fn get_asset<'c, E>(executor: E, asset_id: &str) -> Result<Option<AssetRecord>>
where
    E: Executor<'c, Database = Sqlite>,
{
    sqlx::query_as::<_, AssetRecord>(
        r#"
        SELECT id, asset_id, captured_at, group_id FROM asset WHERE asset_id = ?
        "#,
    )
    .bind(asset_id)
    .fetch_optional(executor)
    .await
}

/// 删除资源记录，返回删除的行数
pub async fn delete_asset<'c, E>(executor: E, asset_id: &str) -> Result<u64>
where
    E: Executor<'c, Database = Sqlite>,
{
    let result = sqlx::query(
        r#"
        DELETE FROM asset WHERE asset_id = ?
        "#,
    )
    .bind(asset_id)
    .execute(executor)
    .await?;

    Ok(result.rows_affected())
}

/// 统计分组的成员数量
pub async fn count_group_members<'c, E>(executor: E, group_id: i64) -> Result<i64>
where
    E: Executor<'c, Database = Sqlite>,
{
    let (count,): (i64,) = sqlx::query_as(
        r#"
        SELECT COUNT(*) FROM asset WHERE group_id = ?
        "#,
    )
    .bind(group_id)
    .fetch_one(executor)
    .await?;

    Ok(count)
}

/// 删除没有任何成员的分组，返回被删除的分组
pub async fn delete_empty_groups<'c, E>(executor: E) -> Result<Vec<HashGroupRecord>>
where
    E: Executor<'c, Database = Sqlite>,
{
    sqlx::query_as::<_, HashGroupRecord>(
        r#"
        DELETE FROM hash_group
        WHERE NOT EXISTS (SELECT 1 FROM asset WHERE asset.group_id = hash_group.id)
        RETURNING id, hash
        "#,
    )
    .fetch_all(executor)
    .await
}

/// 获取所有分组的哈希，以及最早的成员作为代表，按分组 ID 排序
pub async fn get_group_representatives<'c, E>(
    executor: E,
) -> Result<Vec<GroupRepresentativeRecord>>
where
    E: Executor<'c, Database = Sqlite>,
{
    sqlx::query_as::<_, GroupRepresentativeRecord>(
        r#"
        SELECT hash_group.hash AS hash, (
            SELECT asset.asset_id FROM asset
            WHERE asset.group_id = hash_group.id
            ORDER BY asset.captured_at ASC, asset.asset_id ASC
            LIMIT 1
        ) AS asset_id
        FROM hash_group
        ORDER BY hash_group.id ASC
        "#,
    )
    .fetch_all(executor)
    .await
}

/// 获取序列化的索引
pub async fn get_index<'c, E>(executor: E) -> Result<Option<SerializedIndexRecord>>
where
    E: Executor<'c, Database = Sqlite>,
{
    sqlx::query_as::<_, SerializedIndexRecord>(
        r#"
        SELECT blob, updated_at FROM serialized_index WHERE id = 1
        "#,
    )
    .fetch_optional(executor)
    .await
}

/// 写入序列化的索引，已存在时覆盖
pub async fn upsert_index<'c, E>(executor: E, blob: &[u8], updated_at: DateTime<Utc>) -> Result<()>
where
    E: Executor<'c, Database = Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO serialized_index (id, blob, updated_at)
        VALUES (1, ?, ?)
        ON CONFLICT (id) DO UPDATE SET blob = excluded.blob, updated_at = excluded.updated_at
        "#,
    )
    .bind(blob)
    .bind(updated_at)
    .execute(executor)
    .await?;

    Ok(())
}

/// 读取设置
pub async fn get_setting<'c, E>(executor: E, key: &str) -> Result<Option<String>>
where
    E: Executor<'c, Database = Sqlite>,
{
    let row: Option<(String,)> = sqlx::query_as(
        r#"
        SELECT value FROM setting WHERE key = ?
        "#,
    )
    .bind(key)
    .fetch_optional(executor)
    .await?;

    Ok(row.map(|(value,)| value))
}

/// 写入设置，已存在时保持原值，返回最终生效的值
pub async fn init_setting<'c, E>(executor: E, key: &str, value: &str) -> Result<String>
where
    E: Executor<'c, Database = Sqlite>,
{
    let (value,): (String,) = sqlx::query_as(
        r#"
        INSERT INTO setting (key, value)
        VALUES (?, ?)
        ON CONFLICT (key) DO UPDATE SET value = setting.value
        RETURNING value
        "#,
    )
    .bind(key)
    .bind(value)
    .fetch_one(executor)
    .await?;

    Ok(value)
}

/// 查询资源、分组和索引的行数
pub async fn get_count<'c, E>(executor: E) -> Result<(i64, i64, i64)>
where
    E: Executor<'c, Database = Sqlite>,
{
    sqlx::query_as(
        r#"
        SELECT
            (SELECT COUNT(*) FROM asset),
            (SELECT COUNT(*) FROM hash_group),
            (SELECT COUNT(*) FROM serialized_index)
        "#,
    )
    .fetch_one(executor)
    .await
}
