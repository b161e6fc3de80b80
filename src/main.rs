use clap::Parser;
use color_eyre::Result;
use remote_collect::{
    log_init,
    App,
};
use remote_collect_config::Args;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let args = Args::parse();
    log_init(args.verbose)?;
    App::new(args)?.run().await
}
