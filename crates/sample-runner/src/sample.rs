use crate::runner::{RunnerError, RunnerResult};
use std::collections::HashMap;
use std::ffi::{OsStr, OsString};
use std::fmt::{Display, Formatter};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

/// A shader source file plus the artifacts that share its reference basename.
#[derive(Debug, Clone)]
pub struct Sample {
    /// Test name, `samples::`-prefixed with `::` separators.
    pub name: String,
    /// Source path relative to the sample directory.
    pub relative_path: PathBuf,
    /// Source path as handed to the compiler.
    pub source: PathBuf,
    /// Sample directory joined with the reference basename, without any extension.
    pub reference_base: PathBuf,
    extension: String,
}

impl Sample {
    /// Returns `None` if the file at `relative_path` is not a sample source.
    pub fn try_new(root: &Path, relative_path: &Path, extensions: &[String]) -> Option<Self> {
        let file_name = relative_path.file_name()?.to_str()?;
        let (basename, extension) = split_reference_name(file_name)?;
        if !extensions.iter().any(|ext| ext == extension) {
            return None;
        }
        let source = root.join(relative_path);
        let reference_base = source.with_file_name(basename);
        Some(Self {
            name: format!(
                "samples::{}",
                relative_path.to_string_lossy().replace('/', "::")
            ),
            relative_path: relative_path.to_path_buf(),
            source,
            reference_base,
            extension: extension.to_string(),
        })
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// The reference basename shared by all of this sample's artifacts.
    pub fn basename(&self) -> &OsStr {
        self.reference_base.file_name().unwrap_or_default()
    }

    /// `<base>.bc`, written by the compiler.
    pub fn bytecode_path(&self) -> PathBuf {
        self.artifact("bc")
    }

    /// `<base>.out`, the expected interpreter output.
    pub fn expected_output_path(&self) -> PathBuf {
        self.artifact("out")
    }

    /// `<base>.ll`, where `llvm-dis` puts its rendering by default.
    pub fn disassembly_path(&self) -> PathBuf {
        self.artifact("ll")
    }

    // `with_extension` would eat the `.test` of a `foo.test` basename.
    fn artifact(&self, extension: &str) -> PathBuf {
        let mut path = OsString::from(self.reference_base.as_os_str());
        path.push(".");
        path.push(extension);
        PathBuf::from(path)
    }
}

impl Display for Sample {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}

/// Splits `foo.test.glsl` into `("foo.test", "glsl")`. Only the final
/// extension is stripped; a name that is nothing but an extension has no
/// basename.
pub fn split_reference_name(file_name: &str) -> Option<(&str, &str)> {
    let (basename, extension) = file_name.rsplit_once('.')?;
    if basename.is_empty() || extension.is_empty() {
        return None;
    }
    Some((basename, extension))
}

/// Finds every sample under `root`, sorted by name. Subdirectories are only
/// visited when `recursive` is set, and `target` or hidden directories never.
pub fn collect_samples(
    root: &Path,
    extensions: &[String],
    recursive: bool,
) -> RunnerResult<Vec<Sample>> {
    fn recurse(
        root: &Path,
        traverse: &Path,
        extensions: &[String],
        recursive: bool,
        samples: &mut Vec<Sample>,
    ) -> RunnerResult<()> {
        let absolute_path = root.join(traverse);
        trace!("Scanning {}", absolute_path.display());
        for entry in fs::read_dir(&absolute_path)? {
            let entry = entry?;
            let path = entry.path();
            let relative_path = traverse.join(entry.file_name());
            if path.is_dir() {
                if recursive && !is_skipped_dir(&entry.file_name()) {
                    recurse(root, &relative_path, extensions, recursive, samples)?;
                }
            } else if path.is_file() {
                if let Some(sample) = Sample::try_new(root, &relative_path, extensions) {
                    debug!("Found sample: {}", sample.relative_path.display());
                    samples.push(sample);
                }
            }
        }
        Ok(())
    }

    let mut samples = Vec::new();
    recurse(root, Path::new(""), extensions, recursive, &mut samples)?;
    samples.sort_by(|a, b| a.name.cmp(&b.name));
    check_unique_basenames(&samples)?;
    Ok(samples)
}

fn is_skipped_dir(name: &OsStr) -> bool {
    name == "target" || name.to_string_lossy().starts_with('.')
}

/// `foo.glsl` and `foo.frag` would overwrite each other's `foo.bc` and share `foo.out`.
fn check_unique_basenames(samples: &[Sample]) -> RunnerResult<()> {
    let mut seen: HashMap<&Path, &Sample> = HashMap::new();
    for sample in samples {
        if let Some(first) = seen.insert(&sample.reference_base, sample) {
            return Err(RunnerError::DuplicateSample {
                basename: sample.basename().to_string_lossy().into_owned(),
                first: first.source.clone(),
                second: sample.source.clone(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn exts() -> Vec<String> {
        vec!["glsl".to_string(), "frag".to_string()]
    }

    fn touch(path: &Path) {
        fs::write(path, "").expect("failed to create file");
    }

    #[test]
    fn test_split_reference_name() {
        assert_eq!(split_reference_name("foo.glsl"), Some(("foo", "glsl")));
        assert_eq!(
            split_reference_name("foo.test.glsl"),
            Some(("foo.test", "glsl"))
        );
        assert_eq!(split_reference_name("foo"), None);
        assert_eq!(split_reference_name(".glsl"), None);
        assert_eq!(split_reference_name("foo."), None);
    }

    #[test]
    fn test_sample_artifact_paths() {
        let root = Path::new("/home/user/samples");
        let sample = Sample::try_new(root, Path::new("loop.test.frag"), &exts())
            .expect("should be a sample");
        assert_eq!(sample.name, "samples::loop.test.frag");
        assert_eq!(sample.extension(), "frag");
        assert_eq!(sample.basename(), "loop.test");
        assert_eq!(sample.source, root.join("loop.test.frag"));
        assert_eq!(sample.bytecode_path(), root.join("loop.test.bc"));
        assert_eq!(sample.expected_output_path(), root.join("loop.test.out"));
        assert_eq!(sample.disassembly_path(), root.join("loop.test.ll"));
    }

    #[test]
    fn test_unrecognized_extensions_are_not_samples() {
        let root = Path::new("/home/user/samples");
        assert!(Sample::try_new(root, Path::new("foo.out"), &exts()).is_none());
        assert!(Sample::try_new(root, Path::new("foo.bc"), &exts()).is_none());
        assert!(Sample::try_new(root, Path::new("foo.glsl.bak"), &exts()).is_none());
        assert!(Sample::try_new(root, Path::new("README"), &exts()).is_none());
    }

    #[test]
    fn test_collect_samples_flat() {
        let temp_dir = tempdir().expect("failed to create temp dir");
        let base = temp_dir.path();
        for name in ["b.frag", "a.glsl", "a.out", "b.out", "notes.txt", "c.bc"] {
            touch(&base.join(name));
        }
        let nested = base.join("nested");
        fs::create_dir(&nested).expect("failed to create nested dir");
        touch(&nested.join("d.glsl"));

        let samples = collect_samples(base, &exts(), false).expect("failed to collect samples");
        let names: Vec<_> = samples.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["samples::a.glsl", "samples::b.frag"]);
        assert_eq!(samples[0].reference_base, base.join("a"));
    }

    #[test]
    fn test_collect_samples_recursive() {
        let temp_dir = tempdir().expect("failed to create temp dir");
        let base = temp_dir.path();
        touch(&base.join("a.glsl"));
        for dir in ["nested", "target", ".git"] {
            fs::create_dir(base.join(dir)).expect("failed to create dir");
            touch(&base.join(dir).join("d.glsl"));
        }

        let samples = collect_samples(base, &exts(), true).expect("failed to collect samples");
        let names: Vec<_> = samples.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["samples::a.glsl", "samples::nested::d.glsl"]);
        assert_eq!(samples[1].bytecode_path(), base.join("nested").join("d.bc"));
    }

    #[test]
    fn test_collect_samples_empty_dir() {
        let temp_dir = tempdir().expect("failed to create temp dir");
        let samples =
            collect_samples(temp_dir.path(), &exts(), false).expect("failed to collect samples");
        assert!(samples.is_empty());
    }

    #[test]
    fn test_duplicate_basenames() {
        let temp_dir = tempdir().expect("failed to create temp dir");
        let base = temp_dir.path();
        touch(&base.join("dup.glsl"));
        touch(&base.join("dup.frag"));
        match collect_samples(base, &exts(), false) {
            Err(RunnerError::DuplicateSample {
                basename,
                first,
                second,
            }) => {
                assert_eq!(basename, "dup");
                assert_eq!(first, base.join("dup.frag"));
                assert_eq!(second, base.join("dup.glsl"));
            }
            other => panic!("Expected DuplicateSample error, got {other:?}"),
        }
    }
}
