use std::process::ExitCode;

fn main() -> anyhow::Result<ExitCode> {
    nmount_cli::run().map(ExitCode::from)
}
