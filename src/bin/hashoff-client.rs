//! hashoff-client: streams file chunks to a server and prints their digests.

use clap::Parser;
use hashoff::config::ClientArgs;
use hashoff::driver::{PayloadRange, RequestContext};
use hashoff::logging;
use std::process::ExitCode;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, info};

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            match e.downcast_ref::<hashoff::Error>() {
                Some(err) if err.is_config() => eprintln!("Failure (configuration): {e}"),
                _ => eprintln!("Failure: {e}"),
            }
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = ClientArgs::parse();
    logging::init(&args.log_level);

    // Validated before any network activity
    let range = PayloadRange::new(args.smin, args.smax)?;
    debug!(smin = range.min(), smax = range.max(), "Payload range");

    let addr = args.server_addr();
    let mut stream = TcpStream::connect(addr).await?;
    stream.set_nodelay(true)?;
    info!(server = %addr, "Connected");

    let file = File::open(&args.file).await?;
    let mut ctx = RequestContext::new(args.hash_requests, range, BufReader::new(file), args.seed);
    info!(requests = ctx.request_count(), "Sending batch");

    let mut stdout = tokio::io::stdout();
    let summary = ctx.run(&mut stream, &mut stdout).await?;
    debug!(
        adjusted_count = summary.adjusted_count,
        responses = summary.responses_received,
        "Done"
    );

    stream.shutdown().await?;
    Ok(())
}
