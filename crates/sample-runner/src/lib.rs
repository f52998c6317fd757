use crate::sample::collect_samples;
use anyhow::Result;
use clap::Parser;
use libtest_mimic::{Arguments, Trial};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::FmtSubscriber;

pub mod config;
pub mod differ;
pub mod runner;
pub mod sample;
pub mod stage;

pub use config::{CompareConfig, RunnerConfig, Tool};
pub use runner::{Runner, RunnerError, RunnerResult};
pub use sample::Sample;
pub use stage::Stage;

#[derive(Parser, Debug)]
#[command(bin_name = "test-all")]
pub struct Opt {
    /// TOML config file. Defaults to `test-all.toml` in the current directory, if present.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Directory containing the `.glsl`/`.frag` samples and their `.out` files.
    #[arg(long)]
    pub sample_dir: Option<PathBuf>,

    /// Compiler reading shader source on stdin and writing bytecode to stdout.
    #[arg(long)]
    pub compiler: Option<PathBuf>,

    /// Disassembler run on each bytecode file.
    #[arg(long)]
    pub disassembler: Option<PathBuf>,

    /// Interpreter executing each bytecode file.
    #[arg(long)]
    pub interpreter: Option<PathBuf>,

    /// Compare outputs with this external diff tool instead of the builtin differ.
    #[arg(long)]
    pub diff: Option<PathBuf>,

    /// Skip the disassembly stage.
    #[arg(long)]
    pub no_disassemble: bool,

    /// Also pick up samples in subdirectories.
    #[arg(long)]
    pub recursive: bool,

    /// Compare the interpreter's stderr as well as its stdout.
    #[arg(long)]
    pub include_stderr: bool,

    /// Automatically update `.out` files.
    #[arg(long)]
    pub bless: bool,

    #[command(flatten)]
    pub harness: Arguments,
}

impl Opt {
    /// Loads the config file and applies the command-line overrides on top.
    pub fn resolve_config(&self) -> Result<RunnerConfig> {
        let mut config = RunnerConfig::discover(self.config.as_deref())?;
        if let Some(sample_dir) = &self.sample_dir {
            config.sample_dir = sample_dir.clone();
        }
        if let Some(compiler) = &self.compiler {
            config.compiler = Tool::new(compiler);
        }
        if let Some(disassembler) = &self.disassembler {
            config.disassembler = Tool::new(disassembler);
        }
        if let Some(interpreter) = &self.interpreter {
            config.interpreter = Tool::new(interpreter);
        }
        if let Some(diff) = &self.diff {
            config.compare.diff = Some(if diff.as_os_str() == "diff" {
                CompareConfig::default_diff_tool()
            } else {
                Tool::new(diff)
            });
        }
        if self.no_disassemble {
            config.disassemble = false;
        }
        if self.recursive {
            config.recursive = true;
        }
        if self.include_stderr {
            config.compare.include_stderr = true;
        }
        config.validate()?;
        Ok(config)
    }

    /// Harness arguments with a single test thread and path-like filters
    /// (`samples/foo.glsl`) turned into test names (`samples::foo.glsl`).
    pub fn test_arguments(&self) -> Arguments {
        let mut args = self.harness.clone();
        // Every sample shares the tool binaries and may share a directory, keep it sequential.
        args.test_threads = Some(1);
        if let Some(filter) = &mut args.filter {
            *filter = filter.replace('/', "::");
        }
        args
    }
}

pub fn run() -> Result<ExitCode> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let opt = Opt::parse();
    let args = opt.test_arguments();
    let config = opt.resolve_config()?;
    let mut runner = Runner::new(config);
    runner.bless = opt.bless;

    let tests = collect_trials(runner)?;
    Ok(libtest_mimic::run(&args, tests).exit_code())
}

/// One trial per sample, named after the sample and tagged with its extension.
pub fn collect_trials(runner: Runner) -> RunnerResult<Vec<Trial>> {
    let sample_dir = &runner.config.sample_dir;
    tracing::debug!("Using sample directory: {}", sample_dir.display());

    let samples = collect_samples(
        sample_dir,
        &runner.config.extensions,
        runner.config.recursive,
    )?;
    if samples.is_empty() {
        tracing::warn!("No samples found in {}", sample_dir.display());
    }

    let runner = Arc::new(runner);
    let trials = samples
        .into_iter()
        .map(|sample| {
            let runner = runner.clone();
            let kind = sample.extension().to_string();
            Trial::test(sample.to_string(), move || Ok(runner.run_sample(&sample)?))
                .with_kind(kind)
        })
        .collect();
    Ok(trials)
}
