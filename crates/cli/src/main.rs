use std::process;

use clap::Parser;
use durable_stream::{server, types::ServerOptions};
use tracing_subscriber::EnvFilter;

mod conformance;

#[derive(Parser, Debug)]
#[clap(author, version, about = "Durable streams server", long_about = None)]
struct Opts {
    /// Port to listen on
    #[arg(long = "port", default_value_t = 4437)]
    port: u16,

    /// Host to bind to
    #[arg(long = "host", default_value = "127.0.0.1")]
    host: String,

    /// Long-poll timeout in milliseconds
    #[arg(long = "timeout", default_value_t = 30_000)]
    timeout: u64,

    /// Disable response compression
    #[arg(long = "no-compression")]
    no_compression: bool,

    /// Run as a stdin/stdout JSON conformance-test adapter instead of serving HTTP
    #[arg(long = "conformance-adapter", hide = true)]
    conformance_adapter: bool,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let opts = Opts::parse();

    if opts.conformance_adapter {
        if let Err(err) = conformance::run().await {
            tracing::error!(%err, "conformance adapter exited with an error");
            process::exit(1);
        }
        return;
    }

    let options = ServerOptions {
        port: opts.port,
        host: opts.host,
        long_poll_timeout_ms: opts.timeout,
        compression: !opts.no_compression,
        ..Default::default()
    };

    if let Err(err) = server::start_server(options).await {
        tracing::error!(%err, "durable streams server failed to start");
        process::exit(1);
    }
}
