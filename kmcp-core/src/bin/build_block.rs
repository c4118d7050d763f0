//! Granular per-stage binary: scans a directory of reference k-mer
//! artifacts, partitions them into blocks, and writes a complete database
//! (blocks + descriptor). One of several single-purpose stage binaries, each
//! owning one step of the pipeline behind its own `clap::Parser`.

use clap::Parser;

use kmcp_core::args::BuildArgs;
use kmcp_core::commands::run_build;

fn main() {
    env_logger::init();
    let args = BuildArgs::parse();
    if let Err(e) = run_build(args) {
        log::error!("{e}");
        std::process::exit(1);
    }
}
