//! `armada patch`: apply a unified diff to one file and print the result.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Args;

use armada_diff::{apply_file_diff, parse_multi_file_diff, FileDiff};

/// Arguments for `armada patch`.
#[derive(Args, Debug)]
pub struct PatchArgs {
    /// Original file.
    pub file: PathBuf,

    /// Unified diff; may touch several files.
    pub diff: PathBuf,
}

impl PatchArgs {
    pub fn run(self) -> Result<()> {
        let original = std::fs::read_to_string(&self.file)
            .with_context(|| format!("failed to read {}", self.file.display()))?;
        let raw = std::fs::read_to_string(&self.diff)
            .with_context(|| format!("failed to read {}", self.diff.display()))?;
        let diffs = parse_multi_file_diff(&raw)
            .with_context(|| format!("failed to parse {}", self.diff.display()))?;

        let diff = select(&diffs, &self.file)?;
        if diff.is_deleted_file() {
            bail!("diff deletes {}", diff.orig_name);
        }
        print!("{}", apply_file_diff(&original, diff));
        Ok(())
    }
}

/// The single file diff, or the one whose path ends with `file`'s name.
fn select<'a>(diffs: &'a [FileDiff], file: &std::path::Path) -> Result<&'a FileDiff> {
    match diffs {
        [] => bail!("diff touches no files"),
        [only] => Ok(only),
        _ => {
            let target = file.to_string_lossy();
            diffs
                .iter()
                .find(|d| target.ends_with(d.path()) || d.path().ends_with(target.as_ref()))
                .with_context(|| {
                    format!(
                        "diff touches {} files and none matches {}",
                        diffs.len(),
                        file.display()
                    )
                })
        }
    }
}
