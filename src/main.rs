//! flexocksd: runs the tunnel supervisor headless until Ctrl-C.

use std::process::ExitCode;

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    if args.len() > 1 && (args[1] == "--version" || args[1] == "-V") {
        println!("flexocksd {}", env!("CARGO_PKG_VERSION"));
        return ExitCode::SUCCESS;
    }

    flexocks_lib::run()
}
