use std::future::Future;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use image::DynamicImage;
use log::{info, warn};
use regex::Regex;
use tokio::task::spawn_blocking;
use walkdir::WalkDir;

use crate::error::{Error, Result};

/// 资源来源枚举出的一项
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetDescriptor {
    pub asset_id: String,
    pub captured_at: DateTime<Utc>,
}

/// 图片资源来源，例如相册或者本地目录
pub trait AssetSource: Send + Sync {
    /// 列出所有资源，按拍摄时间升序
    fn enumerate(&self) -> impl Future<Output = Result<Vec<AssetDescriptor>>> + Send;

    /// 读取原图的编码数据
    fn fetch_full_resolution(&self, asset_id: &str) -> impl Future<Output = Result<Vec<u8>>> + Send;

    /// 批量删除资源，要么全部成功，要么一个都不删除
    fn delete_batch(&self, asset_ids: &[String]) -> impl Future<Output = Result<()>> + Send;

    /// 生成边长不超过 size 的缩略图
    fn fetch_thumbnail(
        &self,
        asset_id: &str,
        size: u32,
    ) -> impl Future<Output = Result<DynamicImage>> + Send {
        async move {
            let data = self.fetch_full_resolution(asset_id).await?;
            let image = spawn_blocking(move || image::load_from_memory(&data))
                .await
                .map_err(|e| source_error(asset_id, e))?
                .map_err(|e| source_error(asset_id, e))?;
            Ok(image.thumbnail(size, size))
        }
    }

    /// 原图编码后的字节数，用于衡量画质
    fn original_size(&self, asset_id: &str) -> impl Future<Output = Result<u64>> + Send {
        async move { Ok(self.fetch_full_resolution(asset_id).await?.len() as u64) }
    }
}

fn source_error(asset_id: &str, reason: impl ToString) -> Error {
    Error::AssetSource { asset_id: asset_id.to_owned(), reason: reason.to_string() }
}

/// 删除过程中临时重命名使用的后缀
const STAGING_SUFFIX: &str = ".imdedup-deleting";

/// 以本地目录作为资源来源，资源 ID 为文件路径，拍摄时间取文件修改时间
#[derive(Debug, Clone)]
pub struct DirectoryAssetSource {
    root: PathBuf,
    re_suf: Regex,
}

impl DirectoryAssetSource {
    /// suffix 为逗号分隔的后缀名列表，不区分大小写
    pub fn new(root: impl Into<PathBuf>, suffix: &str) -> Result<Self> {
        let re_suf = format!("(?i)^({})$", suffix.replace(',', "|"));
        let re_suf = Regex::new(&re_suf)
            .map_err(|e| Error::Io(std::io::Error::new(std::io::ErrorKind::InvalidInput, e)))?;
        Ok(Self { root: root.into(), re_suf })
    }

    fn scan_directory(root: &Path, re_suf: &Regex) -> Vec<AssetDescriptor> {
        info!("开始扫描目录: {}", root.display());
        let mut entries = WalkDir::new(root)
            .into_iter()
            .filter_map(|entry| {
                let entry = entry.ok()?;
                let path = entry.path();
                if !entry.file_type().is_file() {
                    return None;
                }
                let ext = path.extension()?;
                if !re_suf.is_match(&ext.to_string_lossy()) {
                    return None;
                }
                let modified = entry.metadata().ok()?.modified().ok()?;
                Some(AssetDescriptor {
                    asset_id: path.to_string_lossy().to_string(),
                    captured_at: DateTime::<Utc>::from(modified),
                })
            })
            .collect::<Vec<_>>();
        entries.sort_by(|a, b| {
            a.captured_at.cmp(&b.captured_at).then_with(|| a.asset_id.cmp(&b.asset_id))
        });
        info!("扫描完成，共 {} 张图片", entries.len());
        entries
    }
}

impl AssetSource for DirectoryAssetSource {
    async fn enumerate(&self) -> Result<Vec<AssetDescriptor>> {
        let root = self.root.clone();
        let re_suf = self.re_suf.clone();
        spawn_blocking(move || Self::scan_directory(&root, &re_suf))
            .await
            .map_err(|e| source_error(&self.root.to_string_lossy(), e))
    }

    async fn fetch_full_resolution(&self, asset_id: &str) -> Result<Vec<u8>> {
        tokio::fs::read(asset_id).await.map_err(|e| source_error(asset_id, e))
    }

    async fn delete_batch(&self, asset_ids: &[String]) -> Result<()> {
        // 先把所有文件重命名到同目录的临时名字，任何一个失败就全部改回
        let mut staged: Vec<(PathBuf, PathBuf)> = Vec::with_capacity(asset_ids.len());
        for asset_id in asset_ids {
            let from = PathBuf::from(asset_id);
            let mut to = from.clone().into_os_string();
            to.push(STAGING_SUFFIX);
            let to = PathBuf::from(to);
            if let Err(e) = tokio::fs::rename(&from, &to).await {
                for (from, to) in staged.iter().rev() {
                    if let Err(e) = tokio::fs::rename(to, from).await {
                        warn!("恢复文件失败: {}: {}", from.display(), e);
                    }
                }
                return Err(Error::AssetDeletion(format!("{asset_id}: {e}")));
            }
            staged.push((from, to));
        }

        for (from, to) in &staged {
            if let Err(e) = tokio::fs::remove_file(to).await {
                warn!("清理临时文件失败: {} ({}): {}", to.display(), from.display(), e);
            }
        }
        Ok(())
    }

    async fn original_size(&self, asset_id: &str) -> Result<u64> {
        let metadata = tokio::fs::metadata(asset_id).await.map_err(|e| source_error(asset_id, e))?;
        Ok(metadata.len())
    }
}
