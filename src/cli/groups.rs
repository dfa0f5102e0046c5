use clap::Parser;

use super::{SubCommandExtend, open_store};
use crate::config::{Opts, OutputFormat};
use crate::resolve::{DuplicateGroup, list_duplicate_groups};

#[derive(Parser, Debug, Clone)]
pub struct GroupsCommand {
    /// 每页显示的分组数量
    #[arg(short, long, value_name = "N", default_value_t = 50)]
    pub limit: usize,
    /// 从该分组 ID 之后开始显示
    #[arg(long, value_name = "ID")]
    pub after: Option<i64>,
    /// 输出格式
    #[arg(long, value_enum, value_name = "FORMAT", default_value_t = OutputFormat::Table)]
    pub output_format: OutputFormat,
}

impl SubCommandExtend for GroupsCommand {
    async fn run(&self, opts: &Opts) -> anyhow::Result<()> {
        let store = open_store(opts).await?;
        let groups = list_duplicate_groups(&store, self.limit, self.after).await?;
        print_groups(&groups, self.output_format)
    }
}

fn print_groups(groups: &[DuplicateGroup], format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(groups)?),
        OutputFormat::Table => {
            for group in groups {
                println!("{}\t{}\t{}", group.group.id, group.group.hash, group.members.len());
                for member in &group.members {
                    println!("\t{}\t{}", member.captured_at.to_rfc3339(), member.asset_id);
                }
            }
        }
    }
    Ok(())
}
