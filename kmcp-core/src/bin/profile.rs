//! Granular per-stage binary: aggregates a search-output TSV (grouped by
//! query) into a ranked per-reference abundance profile.

use clap::Parser;

use kmcp_core::args::ProfileArgs;
use kmcp_core::commands::run_profile;

fn main() {
    env_logger::init();
    let args = ProfileArgs::parse();
    if let Err(e) = run_profile(args) {
        log::error!("{e}");
        std::process::exit(1);
    }
}
