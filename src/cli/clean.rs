use anyhow::Result;
use clap::Parser;
use log::info;

use super::{SubCommandExtend, open_store};
use crate::config::Opts;
use crate::scan::rebuild_index;

#[derive(Parser, Debug, Clone)]
pub struct CleanCommand {}

impl SubCommandExtend for CleanCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let store = open_store(opts).await?;
        info!("清理空分组中……");
        let pruned = store.prune_empty_groups().await?;
        info!("删除了 {} 个空分组", pruned.len());

        // BK 树不支持删除节点，直接用剩余的分组重建
        let index = rebuild_index(&store).await?;
        store.save_index(&index.serialize()?).await?;

        let (assets, groups, _) = store.count().await?;
        println!("assets\t{assets}");
        println!("groups\t{groups}");
        println!("pruned\t{}", pruned.len());
        info!("清理完成");
        Ok(())
    }
}
