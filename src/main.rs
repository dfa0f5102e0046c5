use clap::Parser;
use imdedup::Opts;
use imdedup::cli::SubCommandExtend;
use imdedup::config::SubCommand;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let opts = Opts::parse();

    match &opts.subcmd {
        SubCommand::Scan(config) => config.run(&opts).await,
        SubCommand::Groups(config) => config.run(&opts).await,
        SubCommand::Resolve(config) => config.run(&opts).await,
        SubCommand::Search(config) => config.run(&opts).await,
        SubCommand::Clean(config) => config.run(&opts).await,
        SubCommand::Thumbnail(config) => config.run(&opts).await,
    }
}
