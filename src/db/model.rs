use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;

/// 资源记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct AssetRecord {
    /// 数据库内部 ID
    pub id: i64,
    /// 资源来源提供的唯一 ID
    pub asset_id: String,
    /// 拍摄时间
    pub captured_at: DateTime<Utc>,
    /// 所属哈希分组
    pub group_id: Option<i64>,
}

/// 哈希分组记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct HashGroupRecord {
    /// 分组 ID，单调递增，作为稳定的分页游标
    pub id: i64,
    /// 十六进制编码的感知哈希
    pub hash: String,
}

/// 带成员数量的哈希分组
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct GroupSummaryRecord {
    pub id: i64,
    pub hash: String,
    pub member_count: i64,
}

/// 分组哈希及其代表资源，用于重建索引
#[derive(Debug, Clone, FromRow)]
pub struct GroupRepresentativeRecord {
    pub hash: String,
    pub asset_id: Option<String>,
}

/// 序列化的索引
#[derive(Debug, Clone, FromRow)]
pub struct SerializedIndexRecord {
    pub blob: Vec<u8>,
    pub updated_at: DateTime<Utc>,
}
