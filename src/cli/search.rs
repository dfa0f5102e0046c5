use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use log::debug;

use super::{SubCommandExtend, hash_algorithm, open_store};
use crate::config::{Opts, OutputFormat, SearchOptions};
use crate::scan::{IndexRecovery, ScanSession};
use crate::search::{SearchHit, SimilaritySearch};

#[derive(Parser, Debug, Clone)]
pub struct SearchCommand {
    #[command(flatten)]
    pub search: SearchOptions,
    /// 被搜索的图片路径
    pub image: PathBuf,
    /// 输出格式
    #[arg(long, value_enum, value_name = "FORMAT", default_value_t = OutputFormat::Table)]
    pub output_format: OutputFormat,
}

impl SubCommandExtend for SearchCommand {
    async fn run(&self, opts: &Opts) -> anyhow::Result<()> {
        let image = tokio::fs::read(&self.image).await?;
        let store = open_store(opts).await?;
        let session = ScanSession::load(&store, IndexRecovery::Rebuild).await?;
        let hash = hash_algorithm(&store, self.search.hash).await?;
        let search = SimilaritySearch::new(store, session.index(), Arc::new(hash));

        let result = search.search(image, self.search.distance).await?;
        debug!("找到 {} 个距离分组", result.len());

        print_result(&result, self.output_format)
    }
}

fn print_result(result: &[SearchHit], format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(result)?),
        OutputFormat::Table => {
            for hit in result {
                for member in &hit.members {
                    println!("{}\t{}", hit.distance, member.asset_id);
                }
            }
        }
    }
    Ok(())
}
