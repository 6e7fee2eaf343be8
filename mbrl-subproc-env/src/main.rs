// Worker process of a subprocess environment pool. The pool starts one of these per environment,
// the environment itself arrives over the socket as an `EnvConfig`.

use clap::Parser;
use mbrl_core::{env_pools::subproc_worker::serve_subproc_worker, error::Result};
use mbrl_envs::EnvConfig;

#[derive(Parser, Debug)]
struct Args {
    /// Namespaced local socket the pool listens on.
    #[arg(long)]
    socket_name: String,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "warn".to_string()))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    if let Err(err) = serve_subproc_worker::<EnvConfig>(&args.socket_name) {
        tracing::error!(%err, socket = %args.socket_name, "worker process stopped");
        return Err(err);
    }
    Ok(())
}
