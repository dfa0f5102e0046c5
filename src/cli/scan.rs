use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use indicatif::ProgressBar;
use log::info;

use super::{SubCommandExtend, hash_algorithm, open_store};
use crate::config::{Opts, OutputFormat, ScanOptions};
use crate::scan::{ScanCoordinator, ScanSession};
use crate::source::DirectoryAssetSource;
use crate::utils::pb_style;

#[derive(Parser, Debug, Clone)]
pub struct ScanCommand {
    #[command(flatten)]
    pub scan: ScanOptions,
    /// 图片所在目录
    pub path: PathBuf,
    /// 输出格式
    #[arg(long, value_enum, value_name = "FORMAT", default_value_t = OutputFormat::Table)]
    pub output_format: OutputFormat,
}

impl SubCommandExtend for ScanCommand {
    async fn run(&self, opts: &Opts) -> anyhow::Result<()> {
        let path = std::fs::canonicalize(&self.path)?;
        let source = Arc::new(DirectoryAssetSource::new(path, &self.scan.suffix)?);
        let store = open_store(opts).await?;
        let session = ScanSession::load(&store, self.scan.recovery).await?;
        let hash = hash_algorithm(&store, self.scan.hash).await?;

        let pb = ProgressBar::no_length().with_style(pb_style());
        let mut coordinator =
            ScanCoordinator::new(source, store, Arc::new(hash)).progress_bar(pb.clone());
        if let Some(workers) = self.scan.workers {
            coordinator = coordinator.workers(workers);
        }

        let session = coordinator.run(session).await?;
        pb.finish_with_message("扫描完成");

        let report = session.report();
        match self.output_format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(report)?),
            OutputFormat::Table => {
                println!("total\t{}", report.total);
                println!("new_groups\t{}", report.new_groups);
                println!("attached\t{}", report.attached);
                println!("skipped\t{}", report.skipped);
                println!("failed\t{}", report.failed);
            }
        }
        info!("索引节点数量: {}", session.index().read().map(|i| i.len()).unwrap_or_default());

        Ok(())
    }
}
