use anyhow::Result;
use std::process::ExitCode;

pub fn main() -> Result<ExitCode> {
    sample_runner::run()
}
