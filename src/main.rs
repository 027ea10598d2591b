//! minbuild - minimum Windows build required by a PE binary
//!
//! Walks a binary's import tables and reports the highest minimum build its
//! imported APIs require, according to Windows API compatibility metadata.

use clap::Parser;
use minbuild::cli::{Args, CliApp};
use minbuild::error::exit_code_for;
use minbuild::logging::init_tracing;

fn main() {
    // Parse command line arguments; clap exits with 2 on usage errors
    let args = Args::parse();
    init_tracing(args.verbose);

    let exit_code = match CliApp::new(args).run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {:#}", err);
            exit_code_for(&err)
        }
    };

    std::process::exit(exit_code);
}
