//! In-memory demo server exercising the `rs9p` library end to end.
//!
//! Exports a small, process-local filesystem tree rooted at `/` — nothing is
//! read from or written to the host's disk. Useful for exercising the
//! connection/auth/fid lifecycle without an `unpfs`-style real export
//! directory.

mod backend;
mod store;
mod verifier;

use std::sync::Arc;

use clap::Parser;
use rs9p::config::Config;
use rs9p::server::Server;

use crate::backend::MemFs;
use crate::verifier::DecimalUidVerifier;

#[derive(Debug, clap::Parser)]
struct Cli {
    /// proto!address!port, e.g. tcp!127.0.0.1!564 or unix!/tmp/memfs.sock!0
    address: String,

    /// Require a verified credential before Tattach succeeds.
    #[arg(long, default_value_t = false)]
    auth_required: bool,

    /// Worker pool size.
    #[arg(long, default_value_t = 16)]
    nwthreads: u32,

    /// Negotiated maximum message size ceiling.
    #[arg(long, default_value_t = 8192 + rs9p::IOHDRSZ)]
    msize: u32,
}

fn memfs_main(cli: Cli) -> rs9p::Result<i32> {
    let config = Config {
        auth_required: cli.auth_required,
        nwthreads: cli.nwthreads,
        msize: cli.msize,
        ..Config::default()
    };

    println!("[*] Auth required: {}", config.auth_required);
    println!("[*] Ready to accept clients: {}", cli.address);

    let srv = Server::new(config, MemFs::new(), Arc::new(DecimalUidVerifier));
    srv.listen(&cli.address).and(Ok(0))
}

fn main() {
    env_logger::init();

    let exit_code = memfs_main(Cli::parse()).unwrap_or_else(|e| {
        eprintln!("Error: {:?}", e);
        -1
    });

    std::process::exit(exit_code);
}
