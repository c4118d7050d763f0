//! C8 — granular per-stage binary: prints database and block header facts
//! without running a query. Read-only, no index construction or probing.

use clap::Parser;

use kmcp_core::args::InspectArgs;
use kmcp_core::commands::run_inspect;

fn main() {
    env_logger::init();
    let args = InspectArgs::parse();
    if let Err(e) = run_inspect(args) {
        log::error!("{e}");
        std::process::exit(1);
    }
}
