use std::process::ExitCode;

fn main() -> ExitCode {
    hiera_cli::run()
}
