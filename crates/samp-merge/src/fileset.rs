//! Ordered groups of archive files.
//!
//! An input group is either an explicit list of files, read in the order
//! given, or one path whose file name carries `strftime` fields:
//!
//! ```text
//! /data/isff_%Y%m%d_%H%M%S.dat
//! ```
//!
//! A pattern is expanded by listing its directory and parsing each file
//! name back into the time the file starts. Files are selected when they
//! overlap the requested range, which includes the last file starting at or
//! before the range start. Only the file name may carry time fields.

use samp_core::time::parse_with;
use samp_core::SampleError;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// An ordered list of files making up one input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSet {
    name: String,
    paths: Vec<PathBuf>,
}

impl FileSet {
    /// A set of explicitly named files, in the order given.
    pub fn from_paths<P: AsRef<Path>>(paths: impl IntoIterator<Item = P>) -> Self {
        let paths: Vec<PathBuf> = paths.into_iter().map(|p| p.as_ref().to_path_buf()).collect();
        let name = match paths.as_slice() {
            [] => String::from("(empty)"),
            [one] => one.display().to_string(),
            [first, ..] => format!("{}+{}", first.display(), paths.len() - 1),
        };
        Self { name, paths }
    }

    /// Expand a time pattern against the files that exist now.
    ///
    /// `start` and `end` are microsecond time tags; either may be open.
    pub fn from_pattern(
        pattern: &str,
        start: Option<i64>,
        end: Option<i64>,
    ) -> Result<Self, SampleError> {
        let pattern_path = Path::new(pattern);
        let file_pattern = pattern_path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| SampleError::Config(format!("no file name in pattern '{pattern}'")))?;
        let dir = match pattern_path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        if dir.to_string_lossy().contains('%') {
            return Err(SampleError::Config(format!(
                "time fields are only supported in the file name: '{pattern}'"
            )));
        }

        let entries = std::fs::read_dir(&dir)
            .map_err(|e| SampleError::source_io(dir.display().to_string(), e))?;

        let mut dated: Vec<(i64, PathBuf)> = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| SampleError::source_io(dir.display().to_string(), e))?;
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            if let Some(t) = parse_with(file_name, file_pattern) {
                dated.push((t, entry.path()));
            }
        }
        dated.sort();

        let selected = select_range(&dated, start, end);
        debug!(
            pattern,
            candidates = dated.len(),
            selected = selected.len(),
            "Expanded file set pattern"
        );
        if selected.is_empty() {
            warn!(pattern, "No files match pattern and time range");
        }

        Ok(Self {
            name: pattern.to_string(),
            paths: selected,
        })
    }

    /// A file set from command-line style arguments: a single argument
    /// containing `%` is a pattern, anything else is a list of files.
    pub fn from_args(
        args: &[String],
        start: Option<i64>,
        end: Option<i64>,
    ) -> Result<Self, SampleError> {
        match args {
            [one] if one.contains('%') => Self::from_pattern(one, start, end),
            _ => Ok(Self::from_paths(args)),
        }
    }

    /// Name for logs and reports.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Files in read order.
    #[must_use]
    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    /// Whether the set has no files.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

/// Pick the files overlapping `[start, end)` from a time-sorted list.
fn select_range(dated: &[(i64, PathBuf)], start: Option<i64>, end: Option<i64>) -> Vec<PathBuf> {
    // First file that can hold data at `start`: the last one starting at or
    // before it, or the first one if all start later.
    let first = match start {
        Some(start) => dated
            .iter()
            .rposition(|(t, _)| *t <= start)
            .unwrap_or(0),
        None => 0,
    };
    dated[first.min(dated.len())..]
        .iter()
        .take_while(|(t, _)| end.map_or(true, |end| *t < end))
        .map(|(_, p)| p.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use samp_core::time::parse_time;
    use std::fs::File;
    use tempfile::tempdir;

    fn touch(dir: &Path, name: &str) {
        File::create(dir.join(name)).unwrap();
    }

    #[test]
    fn test_explicit_paths_keep_order() {
        let set = FileSet::from_paths(["b.dat", "a.dat"]);
        assert_eq!(set.paths(), &[PathBuf::from("b.dat"), PathBuf::from("a.dat")]);
        assert_eq!(set.name(), "b.dat+1");
    }

    #[test]
    fn test_pattern_selects_overlapping_files() {
        let dir = tempdir().unwrap();
        for name in [
            "isff_20240305_000000.dat",
            "isff_20240305_060000.dat",
            "isff_20240305_120000.dat",
            "isff_20240305_180000.dat",
            "notes.txt",
        ] {
            touch(dir.path(), name);
        }
        let pattern = dir.path().join("isff_%Y%m%d_%H%M%S.dat");
        let start = parse_time("2024-03-05T07:00:00Z").unwrap();
        let end = parse_time("2024-03-05T13:00:00Z").unwrap();

        let set = FileSet::from_pattern(pattern.to_str().unwrap(), Some(start), Some(end)).unwrap();
        let names: Vec<String> = set
            .paths()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["isff_20240305_060000.dat", "isff_20240305_120000.dat"]);
    }

    #[test]
    fn test_pattern_open_range_takes_everything() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "run_20240306.dat");
        touch(dir.path(), "run_20240305.dat");
        let pattern = dir.path().join("run_%Y%m%d.dat");

        let set = FileSet::from_pattern(pattern.to_str().unwrap(), None, None).unwrap();
        assert_eq!(set.paths().len(), 2);
        assert!(set.paths()[0].ends_with("run_20240305.dat"));
    }

    #[test]
    fn test_from_args_dispatch() {
        let dir = tempdir().unwrap();
        let pattern = dir.path().join("x_%Y.dat").to_string_lossy().into_owned();
        assert!(FileSet::from_args(&[pattern], None, None).unwrap().is_empty());

        let list = vec!["a.dat".to_string(), "b.dat".to_string()];
        assert_eq!(FileSet::from_args(&list, None, None).unwrap().paths().len(), 2);
    }

    #[test]
    fn test_select_range_before_first_file() {
        let dated = vec![(10, PathBuf::from("a")), (20, PathBuf::from("b"))];
        assert_eq!(select_range(&dated, Some(5), Some(15)), vec![PathBuf::from("a")]);
        assert_eq!(select_range(&dated, Some(25), None), vec![PathBuf::from("b")]);
        assert!(select_range(&[], Some(25), None).is_empty());
    }
}
