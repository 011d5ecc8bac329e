use clap::Parser;
use omt_dev_server::{run_server, Options};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .init();

  let server = run_server(Options::parse()).await?;

  tokio::select! {
    result = server.wait() => result,
    _ = tokio::signal::ctrl_c() => {
      tracing::info!("Shutting down");
      Ok(())
    }
  }
}
