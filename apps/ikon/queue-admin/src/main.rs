//! IKON Queue Admin - Entry Point

use clap::Parser;
use ikon_queue_admin::cli::Cli;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    core_config::tracing::install_color_eyre();

    ikon_queue_admin::run(Cli::parse()).await
}
