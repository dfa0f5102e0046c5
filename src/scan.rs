use std::collections::HashSet;
use std::sync::{Arc, PoisonError, RwLock};

use clap::ValueEnum;
use futures::StreamExt;
use indicatif::ProgressBar;
use log::{debug, info, warn};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::spawn_blocking;

use crate::bktree::{HashIndex, IndexEntry};
use crate::error::{Error, Result};
use crate::phash::{PHash, PerceptualHasher};
use crate::source::{AssetDescriptor, AssetSource};
use crate::store::HashGroupStore;

/// 扫描状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum ScanState {
    #[default]
    Idle,
    Scanning,
    Finalizing,
}

/// 索引数据缺失或损坏时的处理方式
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IndexRecovery {
    /// 使用存储中的哈希补全或重建索引
    #[default]
    Rebuild,
    /// 直接使用空索引
    Empty,
}

/// 一次扫描的统计
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ScanReport {
    /// 资源总数
    pub total: usize,
    /// 已处理的资源数量
    pub processed: usize,
    /// 新建的哈希分组数量
    pub new_groups: usize,
    /// 加入已有分组的资源数量
    pub attached: usize,
    /// 之前已经扫描过的资源数量
    pub skipped: usize,
    /// 读取或计算哈希失败的资源数量
    pub failed: usize,
}

/// 扫描会话，持有进度和内存中的索引
///
/// 由 `ScanCoordinator::run` 接收并返回，不依赖任何全局状态
#[derive(Debug, Default)]
pub struct ScanSession {
    state: ScanState,
    index: Arc<RwLock<HashIndex>>,
    report: ScanReport,
}

impl ScanSession {
    pub fn new(index: HashIndex) -> Self {
        Self { state: ScanState::Idle, index: Arc::new(RwLock::new(index)), report: ScanReport::default() }
    }

    /// 从存储中加载索引
    ///
    /// 索引损坏时按空索引处理。使用 `Rebuild` 策略时，会把存储中存在但索引中缺失的哈希补回索引，
    /// 如果索引中有存储里不存在的哈希，则完全重建。
    pub async fn load(store: &HashGroupStore, recovery: IndexRecovery) -> Result<Self> {
        let index = match store.load_index().await? {
            Some(record) => match HashIndex::deserialize(&record.blob) {
                Ok(index) => {
                    info!("加载索引: {} 个节点，更新于 {}", index.len(), record.updated_at);
                    index
                }
                Err(e) => {
                    warn!("{e}，使用空索引");
                    HashIndex::new()
                }
            },
            None => {
                debug!("索引不存在，使用空索引");
                HashIndex::new()
            }
        };

        let index = match recovery {
            IndexRecovery::Rebuild => reconcile_index(store, index).await?,
            IndexRecovery::Empty => index,
        };

        Ok(Self::new(index))
    }

    pub fn state(&self) -> ScanState {
        self.state
    }

    pub fn report(&self) -> &ScanReport {
        &self.report
    }

    /// 当前进度，范围 0 ~ 1
    pub fn progress(&self) -> f64 {
        if self.report.total == 0 {
            return if self.state == ScanState::Idle { 1.0 } else { 0.0 };
        }
        self.report.processed as f64 / self.report.total as f64
    }

    /// 索引的共享句柄，供相似图片搜索使用
    pub fn index(&self) -> Arc<RwLock<HashIndex>> {
        self.index.clone()
    }
}

/// 使用存储中的所有哈希重建索引
pub async fn rebuild_index(store: &HashGroupStore) -> Result<HashIndex> {
    let mut index = HashIndex::new();
    for (hash, asset_id) in store.group_representatives().await? {
        index.insert(hash, IndexEntry { hash, asset_id });
    }
    info!("重建索引完成: {} 个节点", index.len());
    Ok(index)
}

/// 让索引中的哈希集合与存储中的一致
async fn reconcile_index(store: &HashGroupStore, mut index: HashIndex) -> Result<HashIndex> {
    let groups = store.group_representatives().await?;
    let hashes = groups.iter().map(|(hash, _)| *hash).collect::<HashSet<_>>();

    // BK 树不支持删除，出现多余的节点只能重建
    if index.iter().any(|(hash, _)| !hashes.contains(hash)) {
        warn!("索引中存在已删除的哈希，重建索引");
        return rebuild_index(store).await;
    }

    let mut repaired = 0;
    for (hash, asset_id) in groups {
        if !index.contains(&hash) {
            index.insert(hash, IndexEntry { hash, asset_id });
            repaired += 1;
        }
    }
    if repaired > 0 {
        warn!("索引缺少 {repaired} 个哈希，已从存储中补全");
    }
    Ok(index)
}

/// 单个资源的预处理结果
enum Prepared {
    /// 已经扫描过
    Known,
    /// 读取或计算哈希失败
    Failed(String, Error),
    Hashed(AssetDescriptor, PHash),
}

/// 写入存储后的结果
enum Committed {
    NewGroup,
    Attached,
    Known,
}

/// 扫描协调器
///
/// 读取原图和计算哈希在多个任务中并发执行，写入存储和索引则通过 `writer` 串行化
pub struct ScanCoordinator<S> {
    source: Arc<S>,
    store: HashGroupStore,
    hasher: Arc<dyn PerceptualHasher>,
    workers: usize,
    writer: Mutex<()>,
    pb: ProgressBar,
}

impl<S: AssetSource> ScanCoordinator<S> {
    pub fn new(source: Arc<S>, store: HashGroupStore, hasher: Arc<dyn PerceptualHasher>) -> Self {
        Self {
            source,
            store,
            hasher,
            workers: num_cpus::get(),
            writer: Mutex::new(()),
            pb: ProgressBar::hidden(),
        }
    }

    /// 同时读取和计算哈希的资源数量
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn progress_bar(mut self, pb: ProgressBar) -> Self {
        self.pb = pb;
        self
    }

    /// 扫描所有资源，更新存储和索引，最后保存索引
    ///
    /// 数据库由其他哈希算法建立时返回 `HasherMismatch`，不做任何修改
    pub async fn run(&self, mut session: ScanSession) -> Result<ScanSession> {
        self.store.ensure_hasher(self.hasher.name()).await?;
        session.state = ScanState::Scanning;
        let assets = self.source.enumerate().await?;
        session.report = ScanReport { total: assets.len(), ..Default::default() };
        info!("开始扫描，共 {} 个资源", assets.len());

        self.pb.set_length(assets.len() as u64);
        self.pb.set_position(0);

        let index = session.index();
        let mut stream = futures::stream::iter(assets)
            .map(|asset| self.prepare(asset))
            .buffer_unordered(self.workers);

        while let Some(prepared) = stream.next().await {
            let report = &mut session.report;
            match prepared? {
                Prepared::Known => report.skipped += 1,
                Prepared::Failed(asset_id, e) => {
                    self.pb.set_message(format!("跳过 {asset_id}"));
                    warn!("跳过 {asset_id}: {e}");
                    report.failed += 1;
                }
                Prepared::Hashed(asset, hash) => match self.commit(&asset, hash, &index).await? {
                    Committed::NewGroup => report.new_groups += 1,
                    Committed::Attached => report.attached += 1,
                    Committed::Known => report.skipped += 1,
                },
            }
            report.processed += 1;
            self.pb.inc(1);
        }

        session.state = ScanState::Finalizing;
        self.finalize(&index).await?;
        session.state = ScanState::Idle;

        info!("扫描完成: {:?}", session.report);
        Ok(session)
    }

    /// 检查是否已扫描，读取原图并计算哈希
    async fn prepare(&self, asset: AssetDescriptor) -> Result<Prepared> {
        if self.store.asset_exists(&asset.asset_id).await? {
            debug!("跳过已扫描资源: {}", asset.asset_id);
            return Ok(Prepared::Known);
        }

        let data = match self.source.fetch_full_resolution(&asset.asset_id).await {
            Ok(data) => data,
            Err(e) => return Ok(Prepared::Failed(asset.asset_id, e)),
        };

        let hasher = self.hasher.clone();
        let hash = spawn_blocking(move || hasher.compute_hash(&data)).await;
        match hash {
            Ok(Ok(hash)) => Ok(Prepared::Hashed(asset, hash)),
            Ok(Err(e)) => Ok(Prepared::Failed(asset.asset_id, e)),
            Err(e) => Ok(Prepared::Failed(asset.asset_id, Error::HashComputation(e.to_string()))),
        }
    }

    /// 查找或创建分组，写入资源记录，必要时插入索引
    ///
    /// 整个过程持有写锁，保证同一个哈希只会创建一个分组和一个索引节点
    async fn commit(
        &self,
        asset: &AssetDescriptor,
        hash: PHash,
        index: &RwLock<HashIndex>,
    ) -> Result<Committed> {
        let _writer = self.writer.lock().await;

        // 这里再检查一次，因为同一个资源可能在处理过程中被其他扫描写入
        if self.store.asset_exists(&asset.asset_id).await? {
            return Ok(Committed::Known);
        }

        let entry = || IndexEntry { hash, asset_id: Some(asset.asset_id.clone()) };
        match self.store.find_group(&hash).await? {
            None => {
                let group = self.store.create_group(&hash).await?;
                self.store.attach_asset(&asset.asset_id, asset.captured_at, &group).await?;
                index.write().unwrap_or_else(PoisonError::into_inner).insert(hash, entry());
                debug!("新建分组 {hash}: {}", asset.asset_id);
                Ok(Committed::NewGroup)
            }
            Some(group) => {
                self.store.attach_asset(&asset.asset_id, asset.captured_at, &group).await?;
                // 上次扫描在建组后中断时，索引里可能还没有这个哈希
                let mut index = index.write().unwrap_or_else(PoisonError::into_inner);
                if !index.contains(&hash) {
                    index.insert(hash, entry());
                }
                debug!("加入分组 {hash}: {}", asset.asset_id);
                Ok(Committed::Attached)
            }
        }
    }

    /// 保存索引，重复调用只会覆盖同一行
    async fn finalize(&self, index: &RwLock<HashIndex>) -> Result<()> {
        let _writer = self.writer.lock().await;
        let blob = index.read().unwrap_or_else(PoisonError::into_inner).serialize()?;
        self.store.save_index(&blob).await?;
        info!("索引已保存: {} 字节", blob.len());
        Ok(())
    }
}
