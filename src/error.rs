use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// 去重引擎的错误类型
#[derive(Error, Debug)]
pub enum Error {
    /// 图片无法解码或缩放，单个资源失败，扫描时跳过即可
    #[error("计算哈希失败: {0}")]
    HashComputation(String),

    /// 序列化的索引数据损坏，调用方可以当作空索引处理
    #[error("索引数据损坏: {0}")]
    CorruptIndex(String),

    /// 唯一约束冲突，单写者约束被破坏时才会出现
    #[error("违反存储唯一约束: {0}")]
    StoreConstraintViolation(String),

    /// 批量删除资源失败，整批未删除
    #[error("删除资源失败: {0}")]
    AssetDeletion(String),

    /// 存储中的数据无法解析，例如哈希不是合法的十六进制
    #[error("存储数据损坏: {0}")]
    CorruptStore(String),

    /// 数据库由另一种哈希算法建立，两种哈希不能混用
    #[error("哈希算法不一致: 数据库使用 {stored}，当前为 {requested}")]
    HasherMismatch { stored: String, requested: String },

    /// 资源来源的其他错误，例如读取原图失败
    #[error("资源读取失败: {asset_id}: {reason}")]
    AssetSource { asset_id: String, reason: String },

    #[error(transparent)]
    Database(sqlx::Error),

    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(ref e) if e.is_unique_violation() => {
                Self::StoreConstraintViolation(e.message().to_owned())
            }
            err => Self::Database(err),
        }
    }
}

impl From<image::ImageError> for Error {
    fn from(err: image::ImageError) -> Self {
        Self::HashComputation(err.to_string())
    }
}
