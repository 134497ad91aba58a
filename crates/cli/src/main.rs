use std::process::ExitCode;

fn main() -> ExitCode {
    leadroute_cli::run()
}
