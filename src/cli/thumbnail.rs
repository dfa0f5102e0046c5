use std::path::PathBuf;

use anyhow::anyhow;
use clap::Parser;
use log::{info, warn};

use super::{SubCommandExtend, open_store};
use crate::config::Opts;
use crate::source::{AssetSource, DirectoryAssetSource};

#[derive(Parser, Debug, Clone)]
pub struct ThumbnailCommand {
    /// 分组 ID
    pub group: i64,
    /// 缩略图输出目录
    #[arg(short, long, default_value = ".")]
    pub output: PathBuf,
    /// 缩略图最大边长
    #[arg(short, long, default_value_t = 128)]
    pub size: u32,
}

impl SubCommandExtend for ThumbnailCommand {
    async fn run(&self, opts: &Opts) -> anyhow::Result<()> {
        let store = open_store(opts).await?;
        let group = store.get_group(self.group).await?.ok_or_else(|| anyhow!("分组不存在: {}", self.group))?;
        let members = store.group_members(group.id).await?;
        let source = DirectoryAssetSource::new(".", "")?;

        tokio::fs::create_dir_all(&self.output).await?;
        for (i, member) in members.iter().enumerate() {
            let thumbnail = match source.fetch_thumbnail(&member.asset_id, self.size).await {
                Ok(thumbnail) => thumbnail,
                Err(e) => {
                    warn!("生成缩略图失败: {e}");
                    continue;
                }
            };
            let path = self.output.join(format!("{}-{}.png", group.id, i));
            thumbnail.save(&path)?;
            println!("{}\t{}", path.display(), member.asset_id);
        }
        info!("分组 {} 共 {} 个成员", group.hash, members.len());
        Ok(())
    }
}
