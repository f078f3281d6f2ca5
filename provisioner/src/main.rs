use anyhow::Result;
use clap::Parser;

mod args;
mod audit;
mod db;
mod gateway;
mod handlers;
mod metrics;
mod models;
mod orchestrator;
mod passwords;
mod postinstall;
mod server;
mod tenancy;
mod workloads;

use args::ServerArgs;
use server::run_server;

#[tokio::main]
async fn main() -> Result<()> {
    urumi_common::init();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = ServerArgs::parse();
    run_server(args).await
}
