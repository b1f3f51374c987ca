use clap::Parser;
use env_logger::Env;

use gateway::commands::base::Cli;

#[tokio::main]
async fn main() -> std::io::Result<()> {
    env_logger::init_from_env(Env::default().default_filter_or("info"));

    let cli = Cli::parse();
    cli.handle().await
}
