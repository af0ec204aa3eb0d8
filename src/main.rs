mod args;
mod commands;

use args::{Cli, Commands, RunArgs};
use clap::Parser;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    match &cli.command {
        Some(Commands::Ports { sysfs_root, json }) => {
            commands::ports::cmd_ports(&cli, sysfs_root.clone(), *json)?
        }
        Some(Commands::Run(args)) => commands::run::cmd_run(&cli, args).await?,
        None => commands::run::cmd_run(&cli, &RunArgs::default()).await?,
    }

    Ok(())
}
