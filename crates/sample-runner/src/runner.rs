use crate::config::RunnerConfig;
use crate::differ::{DifferenceDisplay, LineDiffer, OutputDiffer};
use crate::sample::Sample;
use crate::stage::{self, Stage};
use bytesize::ByteSize;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, error, info, trace, warn};

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
    #[error("TOML parse error in config at {path:?}: {source}")]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("Configuration error: {msg}")]
    Config { msg: String },
    #[error("Failed to start {stage} tool '{program}': {source}")]
    Spawn {
        stage: Stage,
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error(
        "The {stage} stage failed for sample {sample:?}: '{program}' exited with code {exit_status}. Stderr:\n{stderr}"
    )]
    StageFailed {
        stage: Stage,
        sample: PathBuf,
        program: String,
        exit_status: i32,
        stderr: String,
    },
    #[error("Missing expected output {path:?} (rerun with --bless to create it)")]
    MissingExpectedOutput { path: PathBuf },
    #[error(
        "Duplicate sample basename '{basename}': {first:?} and {second:?} would share the same .bc and .out files"
    )]
    DuplicateSample {
        basename: String,
        first: PathBuf,
        second: PathBuf,
    },
    #[error("Outputs differ:\n\n{0}")]
    DifferingOutput(String),
}

pub type RunnerResult<T> = std::result::Result<T, RunnerError>;

/// Runs samples through compile, disassemble, execute and compare.
#[derive(Clone)]
pub struct Runner {
    pub config: RunnerConfig,
    /// Rewrite missing or differing `.out` files instead of failing.
    pub bless: bool,
}

impl Runner {
    pub fn new(config: RunnerConfig) -> Self {
        Self {
            config,
            bless: false,
        }
    }

    pub fn run_sample(&self, sample: &Sample) -> RunnerResult<()> {
        info!("Executing test \"{}\"", sample.source.display());

        let expected_path = sample.expected_output_path();
        if !self.bless && !expected_path.is_file() {
            error!("No expected output for sample {}", sample);
            return Err(RunnerError::MissingExpectedOutput {
                path: expected_path,
            });
        }

        stage::compile(&self.config.compiler, sample)?;
        trace!("Bytecode written to {}", sample.bytecode_path().display());

        if self.config.disassemble {
            stage::disassemble(&self.config.disassembler, sample)?;
            trace!(
                "Disassembly expected at {}",
                sample.disassembly_path().display()
            );
        }

        let execution = stage::execute(
            &self.config.interpreter,
            sample,
            self.config.compare.include_stderr,
        )?;
        let actual = execution.stdout;
        debug!(
            "Interpreter produced {} of output for sample {}",
            ByteSize::b(actual.len() as u64),
            sample
        );

        if !expected_path.is_file() {
            return self.bless_output(sample, &actual);
        }

        let Some(report) = self.compare(sample, &actual)? else {
            info!("Sample '{}' passed.", sample);
            return Ok(());
        };
        if self.bless {
            return self.bless_output(sample, &actual);
        }

        let kept = self.keep_actual_output(sample, &actual)?;
        error!("Output mismatch for sample {}", sample);
        Err(RunnerError::DifferingOutput(format!(
            "{report}\n╰──▶ actual output kept at {}\n",
            kept.display()
        )))
    }

    /// Returns the rendered mismatch report, or `None` if the outputs match.
    fn compare(&self, sample: &Sample, actual: &[u8]) -> RunnerResult<Option<String>> {
        let expected_path = sample.expected_output_path();
        if let Some(diff) = &self.config.compare.diff {
            return stage::external_diff(diff, sample, actual, &expected_path);
        }

        let expected = fs::read(&expected_path)?;
        let expected = String::from_utf8_lossy(&expected);
        let actual = String::from_utf8_lossy(actual);
        let differ = LineDiffer::new(self.config.compare.ignore_whitespace);
        trace!("Comparing with the {} differ", differ.name());
        let diffs = differ.compare(&expected, &actual);
        if diffs.is_empty() {
            return Ok(None);
        }
        let expected_label = expected_path
            .file_name()
            .map_or_else(|| "expected".into(), |n| n.to_string_lossy());
        Ok(Some(differ.format_report(
            &diffs,
            &expected_label,
            &self.config.interpreter.display_name(),
        )))
    }

    fn bless_output(&self, sample: &Sample, actual: &[u8]) -> RunnerResult<()> {
        let expected_path = sample.expected_output_path();
        fs::write(&expected_path, actual)?;
        warn!(
            "Blessed sample '{}': wrote {}",
            sample,
            expected_path.display()
        );
        Ok(())
    }

    /// Persists `actual` to a temp file that survives the run and returns its path.
    #[allow(clippy::unused_self)]
    fn keep_actual_output(&self, sample: &Sample, actual: &[u8]) -> RunnerResult<PathBuf> {
        let prefix = format!("{}-", sample.basename().to_string_lossy());
        let mut file = tempfile::Builder::new()
            .prefix(&prefix)
            .suffix(".actual")
            .tempfile()?;
        file.write_all(actual)?;
        let path = file.into_temp_path().keep().map_err(|e| e.error)?;
        debug!("Kept actual output at {}", path.display());
        Ok(path)
    }
}
