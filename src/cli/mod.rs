mod clean;
mod groups;
mod resolve;
mod scan;
mod search;
mod thumbnail;

pub use clean::*;
pub use groups::*;
pub use resolve::*;
pub use scan::*;
pub use search::*;
pub use thumbnail::*;

use crate::Error;
use crate::config::Opts;
use crate::phash::HashAlgorithm;
use crate::store::HashGroupStore;

pub trait SubCommandExtend {
    fn run(&self, opts: &Opts) -> impl std::future::Future<Output = anyhow::Result<()>> + Send;
}

/// 打开配置目录中的数据库
async fn open_store(opts: &Opts) -> anyhow::Result<HashGroupStore> {
    Ok(HashGroupStore::open(opts.conf_dir.database()).await?)
}

/// 命令行没有指定哈希算法时，使用数据库中记录的算法
async fn hash_algorithm(
    store: &HashGroupStore,
    requested: Option<HashAlgorithm>,
) -> anyhow::Result<HashAlgorithm> {
    if let Some(alg) = requested {
        return Ok(alg);
    }
    match store.hasher().await? {
        Some(name) => Ok(HashAlgorithm::from_name(&name)
            .ok_or_else(|| Error::CorruptStore(format!("未知的哈希算法: {name}")))?),
        None => Ok(HashAlgorithm::default()),
    }
}
