use clap::Parser;
use divebatch::cli::SubCommandExtend;
use divebatch::config::{Opts, SubCommand};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let opts = Opts::parse();

    match &opts.subcmd {
        SubCommand::Georef(config) => config.run(&opts).await,
        SubCommand::Batch(config) => config.run(&opts).await,
        SubCommand::Zones(config) => config.run(&opts).await,
    }
}
