use similar::{Algorithm, DiffOp};
use std::borrow::Cow;
use std::time::{Duration, Instant};

/// How many differing rows are rendered before the table is cut off.
const MAX_ROWS: usize = 10;

/// Upper bound on the time spent looking for a minimal diff of one sample.
const DIFF_DEADLINE: Duration = Duration::from_secs(2);

/// Trait for comparing expected and actual output and producing differences
pub trait OutputDiffer {
    /// Compare two outputs and return a list of differences
    fn compare(&self, expected: &str, actual: &str) -> Vec<Difference>;

    /// Get a human-readable name for this differ
    fn name(&self) -> &'static str;
}

/// Trait for displaying differences in various formats
pub trait DifferenceDisplay {
    /// Format differences as a table
    fn format_table(
        &self,
        diffs: &[Difference],
        expected_label: &str,
        actual_label: &str,
    ) -> String;

    /// Format differences as a detailed report
    fn format_report(
        &self,
        diffs: &[Difference],
        expected_label: &str,
        actual_label: &str,
    ) -> String;
}

/// A single line that is missing, extra, or changed.
///
/// Line numbers are 1-based. A line only present on one side has `None` for
/// the other side's number and text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Difference {
    pub expected_line: Option<usize>,
    pub actual_line: Option<usize>,
    pub expected: Option<String>,
    pub actual: Option<String>,
}

/// Line-based differ, optionally ignoring all whitespace the way `diff -w` does.
#[derive(Debug, Clone, Copy)]
pub struct LineDiffer {
    pub ignore_whitespace: bool,
}

impl LineDiffer {
    pub fn new(ignore_whitespace: bool) -> Self {
        Self { ignore_whitespace }
    }

    fn normalize<'a>(&self, line: &'a str) -> Cow<'a, str> {
        if self.ignore_whitespace && line.contains(char::is_whitespace) {
            Cow::Owned(line.chars().filter(|c| !c.is_whitespace()).collect())
        } else {
            Cow::Borrowed(line)
        }
    }
}

impl OutputDiffer for LineDiffer {
    fn compare(&self, expected: &str, actual: &str) -> Vec<Difference> {
        let expected_lines: Vec<&str> = expected.lines().collect();
        let actual_lines: Vec<&str> = actual.lines().collect();
        let expected_norm: Vec<_> = expected_lines.iter().map(|l| self.normalize(l)).collect();
        let actual_norm: Vec<_> = actual_lines.iter().map(|l| self.normalize(l)).collect();

        // Past the deadline Myers gives up on finding the minimal script and
        // reports the rest as one replaced block.
        let deadline = Instant::now() + DIFF_DEADLINE;
        let ops = similar::capture_diff_slices_deadline(
            Algorithm::Myers,
            &expected_norm,
            &actual_norm,
            Some(deadline),
        );

        let mut differences = Vec::new();
        for op in ops {
            let (old_index, old_len, new_index, new_len) = match op {
                DiffOp::Equal { .. } => continue,
                DiffOp::Delete {
                    old_index,
                    old_len,
                    new_index,
                } => (old_index, old_len, new_index, 0),
                DiffOp::Insert {
                    old_index,
                    new_index,
                    new_len,
                } => (old_index, 0, new_index, new_len),
                DiffOp::Replace {
                    old_index,
                    old_len,
                    new_index,
                    new_len,
                } => (old_index, old_len, new_index, new_len),
            };
            // A replaced block pairs its lines up, so a changed line is one row.
            for k in 0..old_len.max(new_len) {
                let expected_idx = (k < old_len).then_some(old_index + k);
                let actual_idx = (k < new_len).then_some(new_index + k);
                differences.push(Difference {
                    expected_line: expected_idx.map(|n| n + 1),
                    actual_line: actual_idx.map(|n| n + 1),
                    expected: expected_idx.map(|n| expected_lines[n].to_string()),
                    actual: actual_idx.map(|n| actual_lines[n].to_string()),
                });
            }
        }
        differences
    }

    fn name(&self) -> &'static str {
        if self.ignore_whitespace {
            "Lines (ignoring whitespace)"
        } else {
            "Lines"
        }
    }
}

impl DifferenceDisplay for LineDiffer {
    fn format_table(
        &self,
        diffs: &[Difference],
        expected_label: &str,
        actual_label: &str,
    ) -> String {
        use tabled::settings::{Alignment, Modify, Style, object::Rows};

        fn line_no(n: Option<usize>) -> String {
            n.map_or_else(|| "--".to_string(), |n| n.to_string())
        }

        let mut builder = tabled::builder::Builder::default();
        builder.push_record(["#", expected_label, "#", actual_label]);
        for d in diffs.iter().take(MAX_ROWS) {
            builder.push_record([
                line_no(d.expected_line),
                d.expected.clone().unwrap_or_default(),
                line_no(d.actual_line),
                d.actual.clone().unwrap_or_default(),
            ]);
        }

        let mut table = builder.build();
        table
            .with(Style::modern())
            .with(Modify::new(Rows::first()).with(Alignment::center()));

        let mut result = table.to_string();

        if diffs.len() > MAX_ROWS {
            let last_line_width = result.lines().last().map_or(0, |l| l.chars().count());
            result.push_str(&format!(
                "\n{:>width$}",
                format!("... {} more differences", diffs.len() - MAX_ROWS),
                width = last_line_width
            ));
        }

        result
    }

    fn format_report(
        &self,
        diffs: &[Difference],
        expected_label: &str,
        actual_label: &str,
    ) -> String {
        let mut report = format!(
            "Comparison: {}\nTotal differences: {} lines\n\n",
            self.name(),
            diffs.len()
        );
        report.push_str(&self.format_table(diffs, expected_label, actual_label));
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_outputs() {
        let differ = LineDiffer::new(false);
        assert!(differ.compare("1\n2\n3\n", "1\n2\n3\n").is_empty());
    }

    #[test]
    fn test_whitespace_is_ignored_like_diff_w() {
        let differ = LineDiffer::new(true);
        let expected = "x = 1\n  y =\t2\n";
        let actual = "x=1\r\ny = 2";
        assert!(differ.compare(expected, actual).is_empty());

        let strict = LineDiffer::new(false);
        assert_eq!(strict.compare(expected, actual).len(), 2);
    }

    #[test]
    fn test_changed_line_is_one_row() {
        let differ = LineDiffer::new(true);
        let diffs = differ.compare("a\nb\nc\n", "a\nB\nc\n");
        assert_eq!(
            diffs,
            vec![Difference {
                expected_line: Some(2),
                actual_line: Some(2),
                expected: Some("b".into()),
                actual: Some("B".into()),
            }]
        );
    }

    #[test]
    fn test_missing_and_extra_lines() {
        let differ = LineDiffer::new(true);
        let diffs = differ.compare("a\nb\nc\nd\n", "a\nc\nd\ne\n");
        assert_eq!(diffs.len(), 2);
        assert_eq!(diffs[0].expected_line, Some(2));
        assert_eq!(diffs[0].expected.as_deref(), Some("b"));
        assert_eq!(diffs[0].actual_line, None);
        assert_eq!(diffs[1].expected_line, None);
        assert_eq!(diffs[1].actual_line, Some(4));
        assert_eq!(diffs[1].actual.as_deref(), Some("e"));
    }

    #[test]
    fn test_empty_actual_output() {
        let differ = LineDiffer::new(true);
        let diffs = differ.compare("1\n2\n", "");
        assert_eq!(diffs.len(), 2);
        assert!(diffs.iter().all(|d| d.actual.is_none()));
    }

    #[test]
    fn test_report_is_truncated() {
        let differ = LineDiffer::new(false);
        let expected: String = (0..15).map(|i| format!("{i}\n")).collect();
        let actual: String = (0..15).map(|i| format!("x{i}\n")).collect();
        let diffs = differ.compare(&expected, &actual);
        assert_eq!(diffs.len(), 15);

        let report = differ.format_report(&diffs, "foo.out", "gli");
        assert!(report.contains("Total differences: 15 lines"));
        assert!(report.contains("foo.out"));
        assert!(report.contains("... 5 more differences"));
    }

    #[test]
    fn test_large_outputs_that_share_nothing() {
        let differ = LineDiffer::new(true);
        let expected: String = (0..20_000).map(|i| format!("{i}\n")).collect();
        let actual: String = (0..20_000).map(|i| format!("x{i}\n")).collect();
        let diffs = differ.compare(&expected, &actual);
        assert_eq!(diffs.len(), 20_000);
        assert_eq!(diffs[0].expected.as_deref(), Some("0"));
        assert_eq!(diffs[0].actual.as_deref(), Some("x0"));
        assert_eq!(diffs[19_999].expected_line, Some(20_000));
        assert_eq!(diffs[19_999].actual_line, Some(20_000));
    }

    #[test]
    fn test_large_outputs_with_one_change() {
        let differ = LineDiffer::new(false);
        let expected: String = (0..50_000).map(|i| format!("{i}\n")).collect();
        let actual = expected.replacen("\n31337\n", "\nchanged\n", 1);
        let diffs = differ.compare(&expected, &actual);
        assert_eq!(
            diffs,
            vec![Difference {
                expected_line: Some(31_338),
                actual_line: Some(31_338),
                expected: Some("31337".into()),
                actual: Some("changed".into()),
            }]
        );
    }
}
