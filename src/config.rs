use std::convert::Infallible;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;

use clap::{Parser, Subcommand, ValueEnum};
use directories::ProjectDirs;

use crate::cli::*;
use crate::phash::HashAlgorithm;
use crate::scan::IndexRecovery;

static CONF_DIR: LazyLock<ConfDir> = LazyLock::new(|| {
    let path = ProjectDirs::from("", "imdedup", "imdedup")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".imdedup"));
    ConfDir { path }
});

fn default_config_dir() -> &'static str {
    CONF_DIR.path().to_str().unwrap_or(".imdedup")
}

#[derive(Parser, Debug, Clone)]
pub struct ScanOptions {
    /// 扫描的文件后缀名，多个后缀用逗号分隔
    #[arg(short, long, default_value = "jpg,jpeg,png,webp,gif,bmp")]
    pub suffix: String,
    /// 同时读取和计算哈希的图片数量，默认为 CPU 核数
    #[arg(short = 'j', long, value_name = "N")]
    pub workers: Option<usize>,
    /// 感知哈希算法，默认使用数据库中记录的算法，新数据库为 dhash
    #[arg(short = 'H', long, value_enum)]
    pub hash: Option<HashAlgorithm>,
    /// 索引缺失或损坏时的处理方式
    #[arg(long, value_enum, default_value_t = IndexRecovery::Rebuild)]
    pub recovery: IndexRecovery,
}

#[derive(Parser, Debug, Clone)]
pub struct SearchOptions {
    /// 两个相似哈希允许的最大汉明距离，范围从 0 到 64
    #[arg(long, value_name = "N", default_value_t = 10, value_parser = clap::value_parser!(u32).range(0..=64))]
    pub distance: u32,
    /// 感知哈希算法，需要与扫描时一致，默认使用数据库中记录的算法
    #[arg(short = 'H', long, value_enum)]
    pub hash: Option<HashAlgorithm>,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "imdedup", version)]
pub struct Opts {
    #[command(subcommand)]
    pub subcmd: SubCommand,
    /// imdedup 数据目录
    #[arg(short, long, default_value = default_config_dir())]
    pub conf_dir: ConfDir,
}

#[derive(Subcommand, Debug, Clone)]
pub enum SubCommand {
    /// 扫描目录中的图片，计算哈希并分组
    Scan(ScanCommand),
    /// 列出重复的分组
    Groups(GroupsCommand),
    /// 合并或删除重复分组
    Resolve(ResolveCommand),
    /// 搜索相似图片
    Search(SearchCommand),
    /// 清理空分组并重写索引
    Clean(CleanCommand),
    /// 导出分组成员的缩略图
    Thumbnail(ThumbnailCommand),
}

#[derive(Debug, Clone)]
pub struct ConfDir {
    path: PathBuf,
}

impl ConfDir {
    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// 返回数据库文件的路径
    pub fn database(&self) -> PathBuf {
        self.path.join("imdedup.db")
    }
}

impl FromStr for ConfDir {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self { path: PathBuf::from(s) })
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, Default)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
}
