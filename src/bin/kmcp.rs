//! The unified `kmcp` CLI: one binary dispatching to the `build`/`search`/
//! `profile`/`inspect` subcommands over their own per-stage modules.

use clap::{Parser, Subcommand};

use kmcp_core::args::{BuildArgs, InspectArgs, ProfileArgs, SearchArgs};
use kmcp_core::commands::{run_build, run_inspect, run_profile, run_search};

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: jemallocator::Jemalloc = jemallocator::Jemalloc;

#[derive(Parser, Debug)]
#[clap(author, version, about = "k-mer-based metagenomic containment profiling over a bit-sliced Bloom-filter-matrix index")]
struct Args {
    #[clap(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Build a Bloom-filter-matrix database from reference k-mer artifacts
    Build(BuildArgs),
    /// Query a database for containment hits
    Search(SearchArgs),
    /// Aggregate search hits into a ranked abundance profile
    Profile(ProfileArgs),
    /// Print database and block header facts without running a query
    Inspect(InspectArgs),
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    let result = match args.cmd {
        Commands::Build(cmd_args) => run_build(cmd_args),
        Commands::Search(cmd_args) => run_search(cmd_args),
        Commands::Profile(cmd_args) => run_profile(cmd_args),
        Commands::Inspect(cmd_args) => run_inspect(cmd_args),
    };

    if let Err(e) = result {
        log::error!("{e}");
        std::process::exit(1);
    }
}
