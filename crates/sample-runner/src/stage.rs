use crate::config::Tool;
use crate::runner::{RunnerError, RunnerResult};
use crate::sample::Sample;
use std::fmt::{Display, Formatter};
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use tracing::{debug, trace};

/// One step of the per-sample pipeline, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Compile,
    Disassemble,
    Execute,
    Compare,
}

impl Stage {
    pub fn name(self) -> &'static str {
        match self {
            Self::Compile => "compile",
            Self::Disassemble => "disassemble",
            Self::Execute => "execute",
            Self::Compare => "compare",
        }
    }
}

impl Display for Stage {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// What a finished stage left behind.
#[derive(Debug)]
pub struct StageOutput {
    pub stage: Stage,
    pub program: String,
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl StageOutput {
    /// The exit code, or `-1` if the process was killed by a signal.
    pub fn exit_code(&self) -> i32 {
        self.status.code().unwrap_or(-1)
    }

    /// Turns an unsuccessful exit into a [`RunnerError::StageFailed`].
    pub fn ensure_success(self, sample: &Sample) -> RunnerResult<Self> {
        if self.status.success() {
            return Ok(self);
        }
        Err(self.into_failure(sample))
    }

    pub fn into_failure(self, sample: &Sample) -> RunnerError {
        RunnerError::StageFailed {
            stage: self.stage,
            sample: sample.source.clone(),
            program: self.program,
            exit_status: self.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&self.stderr).into_owned(),
        }
    }
}

/// Waits for `cmd` and collects whatever it wrote to piped streams.
fn run_command(stage: Stage, tool: &Tool, cmd: &mut Command) -> RunnerResult<StageOutput> {
    debug!("Running {} command: {:?}", stage, cmd);
    let output = cmd.output().map_err(|source| RunnerError::Spawn {
        stage,
        program: tool.display_name(),
        source,
    })?;
    let stage_output = StageOutput {
        stage,
        program: tool.display_name(),
        status: output.status,
        stdout: output.stdout,
        stderr: output.stderr,
    };
    debug!(
        "{} stage exited with code {}",
        stage,
        stage_output.exit_code()
    );
    Ok(stage_output)
}

/// `compiler < source > base.bc`
pub fn compile(compiler: &Tool, sample: &Sample) -> RunnerResult<StageOutput> {
    let source = File::open(&sample.source)?;
    let bytecode = File::create(sample.bytecode_path())?;
    trace!(
        "Compiling {} into {}",
        sample.source.display(),
        sample.bytecode_path().display()
    );
    let mut cmd = compiler.command();
    cmd.stdin(Stdio::from(source))
        .stdout(Stdio::from(bytecode))
        .stderr(Stdio::piped());
    run_command(Stage::Compile, compiler, &mut cmd)?.ensure_success(sample)
}

/// `disassembler base.bc`, the rendering it writes is not inspected.
pub fn disassemble(disassembler: &Tool, sample: &Sample) -> RunnerResult<StageOutput> {
    let mut cmd = disassembler.command();
    cmd.arg(sample.bytecode_path())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    run_command(Stage::Disassemble, disassembler, &mut cmd)?.ensure_success(sample)
}

/// `interpreter base.bc`, stdout is the program output.
///
/// With `merge_stderr` the interpreter's stdout and stderr share one pipe, so
/// runtime messages land in the output interleaved as they were written.
pub fn execute(
    interpreter: &Tool,
    sample: &Sample,
    merge_stderr: bool,
) -> RunnerResult<StageOutput> {
    if merge_stderr {
        return execute_merged(interpreter, sample);
    }
    let mut cmd = interpreter.command();
    cmd.arg(sample.bytecode_path())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    run_command(Stage::Execute, interpreter, &mut cmd)?.ensure_success(sample)
}

fn execute_merged(interpreter: &Tool, sample: &Sample) -> RunnerResult<StageOutput> {
    let (mut reader, writer) = io::pipe()?;
    let mut cmd = interpreter.command();
    cmd.arg(sample.bytecode_path())
        .stdin(Stdio::null())
        .stdout(writer.try_clone()?)
        .stderr(writer);
    debug!("Running {} command: {:?}", Stage::Execute, cmd);
    let mut child = cmd.spawn().map_err(|source| RunnerError::Spawn {
        stage: Stage::Execute,
        program: interpreter.display_name(),
        source,
    })?;
    // The command still holds the write ends, reading would never see EOF.
    drop(cmd);

    let mut combined = Vec::new();
    reader.read_to_end(&mut combined)?;
    let status = child.wait()?;
    let stage_output = StageOutput {
        stage: Stage::Execute,
        program: interpreter.display_name(),
        status,
        stdout: combined.clone(),
        stderr: combined,
    };
    debug!("execute stage exited with code {}", stage_output.exit_code());
    stage_output.ensure_success(sample)
}

/// `diff <args> - expected`, fed `actual` on stdin.
///
/// Returns `Ok(None)` on a match and `Ok(Some(report))` with the tool's
/// stdout on a mismatch. Any exit code other than 0 or 1 is a failure of the
/// tool itself.
pub fn external_diff(
    diff: &Tool,
    sample: &Sample,
    actual: &[u8],
    expected: &Path,
) -> RunnerResult<Option<String>> {
    let mut cmd = diff.command();
    cmd.arg("-")
        .arg(expected)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    debug!("Running {} command: {:?}", Stage::Compare, cmd);
    let spawn_error = |source| RunnerError::Spawn {
        stage: Stage::Compare,
        program: diff.display_name(),
        source,
    };
    let mut child = cmd.spawn().map_err(spawn_error)?;

    // Written from a separate thread so a chatty diff can't fill its stdout
    // pipe while we are still blocked writing its stdin.
    let stdin = child.stdin.take();
    let output = thread::scope(|scope| {
        let writer = scope.spawn(move || -> std::io::Result<()> {
            if let Some(mut stdin) = stdin {
                stdin.write_all(actual)?;
            }
            Ok(())
        });
        let output = child.wait_with_output();
        // A tool that exits without reading all of stdin gives a broken pipe
        // here, its exit status is what matters.
        if let Ok(Err(e)) = writer.join() {
            trace!("Writing diff input failed: {}", e);
        }
        output
    })?;

    let stage_output = StageOutput {
        stage: Stage::Compare,
        program: diff.display_name(),
        status: output.status,
        stdout: output.stdout,
        stderr: output.stderr,
    };
    debug!("compare stage exited with code {}", stage_output.exit_code());
    match stage_output.status.code() {
        Some(0) => Ok(None),
        Some(1) => Ok(Some(
            String::from_utf8_lossy(&stage_output.stdout).into_owned(),
        )),
        _ => Err(stage_output.into_failure(sample)),
    }
}
