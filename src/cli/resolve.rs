use std::sync::Arc;

use anyhow::anyhow;
use clap::Parser;
use log::{info, warn};

use super::{SubCommandExtend, open_store};
use crate::config::Opts;
use crate::resolve::{DuplicateGroup, ResolveMode, ResolvePlan, Resolver};
use crate::source::DirectoryAssetSource;
use crate::utils::confirm;

#[derive(Parser, Debug, Clone)]
pub struct ResolveCommand {
    /// 要处理的分组 ID
    #[arg(value_name = "ID", required_unless_present = "all")]
    pub groups: Vec<i64>,
    /// 处理所有重复分组
    #[arg(long)]
    pub all: bool,
    /// 处理方式
    #[arg(short, long, value_enum, default_value_t = ResolveMode::Merge)]
    pub mode: ResolveMode,
    /// 只显示将要删除的文件
    #[arg(long)]
    pub dry_run: bool,
    /// 不再询问，直接删除
    #[arg(short, long)]
    pub yes: bool,
}

impl SubCommandExtend for ResolveCommand {
    async fn run(&self, opts: &Opts) -> anyhow::Result<()> {
        let store = open_store(opts).await?;
        // 资源 ID 就是扫描时记录的绝对路径，不需要指定根目录
        let source = Arc::new(DirectoryAssetSource::new(".", "")?);
        let resolver = Resolver::new(source, store);

        let groups = if self.all {
            let mut groups = vec![];
            let mut after = None;
            loop {
                let page = resolver.list_groups(100, after).await?;
                let Some(last) = page.last() else {
                    break;
                };
                after = Some(last.group.id);
                groups.extend(page);
            }
            groups
        } else {
            let mut groups = Vec::with_capacity(self.groups.len());
            for &id in &self.groups {
                let group =
                    resolver.get_group(id).await?.ok_or_else(|| anyhow!("分组不存在: {id}"))?;
                groups.push(group);
            }
            groups
        };

        let mut deleted = 0;
        for group in &groups {
            let Some(plan) = self.confirm_group(&resolver, group).await? else {
                continue;
            };
            match resolver.execute(group, plan).await {
                Ok(resolution) => {
                    for asset_id in &resolution.deleted {
                        println!("[DEL] {asset_id}");
                    }
                    if let Some(kept) = &resolution.kept {
                        println!("[KEEP] {kept}");
                    }
                    deleted += resolution.deleted.len();
                }
                // 单个分组删除失败时继续处理其他分组
                Err(e) => warn!("处理分组 {} 失败: {e}", group.group.id),
            }
        }

        info!("处理完成，共删除 {deleted} 个文件");
        Ok(())
    }
}

impl ResolveCommand {
    /// 显示处理计划，返回用户确认的计划，dry run 时总是返回 None
    async fn confirm_group(
        &self,
        resolver: &Resolver<DirectoryAssetSource>,
        group: &DuplicateGroup,
    ) -> anyhow::Result<Option<ResolvePlan>> {
        let plan = resolver.plan(group, self.mode).await;
        println!("# {} {}", group.group.id, group.group.hash);
        if let Some(kept) = &plan.kept {
            println!("  keep   {kept}");
        }
        for asset_id in &plan.delete {
            println!("  delete {asset_id}");
        }
        if self.dry_run || plan.delete.is_empty() {
            return Ok(None);
        }
        if self.yes || confirm("确认删除？")? {
            return Ok(Some(plan));
        }
        Ok(None)
    }
}
