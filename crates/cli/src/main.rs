use std::process::ExitCode;

fn main() -> ExitCode {
    wabridge_cli::run()
}
