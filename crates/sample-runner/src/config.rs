use crate::runner::{RunnerError, RunnerResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, trace};

/// The config file picked up from the working directory when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "test-all.toml";

/// Everything the runner needs to know to process a sample directory.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunnerConfig {
    /// Directory holding the sample sources and their expected outputs.
    pub sample_dir: PathBuf,
    /// Source extensions that mark a file as a sample, without the leading dot.
    pub extensions: Vec<String>,
    /// Also look for samples in subdirectories of `sample_dir`.
    pub recursive: bool,
    /// Reads shader source on stdin and writes bytecode to stdout.
    pub compiler: Tool,
    /// Takes the bytecode path and writes a human-readable rendering next to it.
    pub disassembler: Tool,
    /// Set to `false` to skip the disassembly stage entirely.
    pub disassemble: bool,
    /// Takes the bytecode path and writes program output to stdout.
    pub interpreter: Tool,
    pub compare: CompareConfig,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            sample_dir: PathBuf::from("samples"),
            extensions: vec!["glsl".to_string(), "frag".to_string()],
            recursive: false,
            compiler: Tool::new("./glc"),
            disassembler: Tool::new("llvm-dis"),
            disassemble: true,
            interpreter: Tool::new("./gli"),
            compare: CompareConfig::default(),
        }
    }
}

/// An external program plus the arguments passed ahead of the sample-specific ones.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Tool {
    pub path: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
}

impl Tool {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Builds a command for this tool with the configured arguments already applied.
    pub fn command(&self) -> Command {
        let mut cmd = Command::new(&self.path);
        cmd.args(&self.args);
        cmd
    }

    /// The program name as shown in reports.
    pub fn display_name(&self) -> String {
        self.path.display().to_string()
    }

    /// `./glc` and `bin/gli` are relative to `base`, bare names like `diff`
    /// are left for `PATH` lookup.
    fn resolve_relative_to(&mut self, base: &Path) {
        if self.path.is_relative() && self.path.components().count() > 1 {
            self.path = base.join(&self.path);
        }
    }
}

/// How interpreter output is compared with the expected `.out` file.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct CompareConfig {
    /// Treat lines that only differ in whitespace as equal (like `diff -w`).
    /// Only used by the builtin comparison.
    pub ignore_whitespace: bool,
    /// Compare the interpreter's stderr too, interleaved with its stdout.
    pub include_stderr: bool,
    /// External diff tool. When unset the builtin line differ is used.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff: Option<Tool>,
}

impl Default for CompareConfig {
    fn default() -> Self {
        Self {
            ignore_whitespace: true,
            include_stderr: false,
            diff: None,
        }
    }
}

impl CompareConfig {
    /// `diff -w`, whitespace-insensitive like the builtin default.
    pub fn default_diff_tool() -> Tool {
        Tool::new("diff").with_args(["-w"])
    }
}

impl RunnerConfig {
    /// Reads a TOML config file. Relative paths inside it are taken relative
    /// to the directory the file lives in.
    pub fn from_path<P: AsRef<Path>>(path: P) -> RunnerResult<Self> {
        let path = path.as_ref();
        trace!("Reading config from {}", path.display());
        let content = fs::read_to_string(path)?;
        let mut config: RunnerConfig = toml::from_str(&content).map_err(|e| RunnerError::Toml {
            path: path.to_path_buf(),
            source: e,
        })?;
        let base = path.parent().unwrap_or_else(|| Path::new(""));
        config.resolve_relative_to(base);
        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Loads `explicit` if given, otherwise [`DEFAULT_CONFIG_FILE`] from the
    /// current directory if it exists, otherwise the defaults.
    pub fn discover(explicit: Option<&Path>) -> RunnerResult<Self> {
        match explicit {
            Some(path) => Self::from_path(path),
            None if Path::new(DEFAULT_CONFIG_FILE).is_file() => {
                Self::from_path(DEFAULT_CONFIG_FILE)
            }
            None => {
                debug!("No {} found, using default config", DEFAULT_CONFIG_FILE);
                Ok(Self::default())
            }
        }
    }

    fn resolve_relative_to(&mut self, base: &Path) {
        if base.as_os_str().is_empty() {
            return;
        }
        if self.sample_dir.is_relative() {
            self.sample_dir = base.join(&self.sample_dir);
        }
        self.compiler.resolve_relative_to(base);
        self.disassembler.resolve_relative_to(base);
        self.interpreter.resolve_relative_to(base);
        if let Some(diff) = &mut self.compare.diff {
            diff.resolve_relative_to(base);
        }
    }

    /// Checks the config can be acted on and normalizes the extension list.
    pub fn validate(&mut self) -> RunnerResult<()> {
        self.extensions = self
            .extensions
            .iter()
            .map(|ext| ext.trim_start_matches('.').to_string())
            .filter(|ext| !ext.is_empty())
            .collect();
        if self.extensions.is_empty() {
            return Err(RunnerError::Config {
                msg: "at least one sample extension is required".into(),
            });
        }
        if !self.sample_dir.is_dir() {
            return Err(RunnerError::Config {
                msg: format!(
                    "sample directory {} does not exist",
                    self.sample_dir.display()
                ),
            });
        }
        Ok(())
    }
}
