use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tempfile::{NamedTempFile, TempPath};
use tracing::warn;

/// Write-then-rename wrapper: bytes go to a temporary file next to the
/// target and only replace it on [`PendingWrite::finish`]. Dropping an
/// unfinished write removes the temporary file.
pub struct PendingWrite {
    target: PathBuf,
    tmp: BufWriter<NamedTempFile>,
}

impl PendingWrite {
    pub fn create(target: &Path) -> Result<Self> {
        let dir = parent_dir(target);
        fs::create_dir_all(dir)
            .with_context(|| format!("[io::atomic] Failed to create dir {}", dir.display()))?;
        let tmp = NamedTempFile::new_in(dir)
            .with_context(|| format!("[io::atomic] Failed to create temp file in {}", dir.display()))?;
        Ok(Self { target: target.to_path_buf(), tmp: BufWriter::new(tmp) })
    }

    #[inline] pub fn target(&self) -> &Path { &self.target }

    /// Flush, fsync (best effort) and rename onto the target.
    pub fn finish(self) -> Result<PathBuf> {
        let (target, tmp) = self.prepare()?;
        tmp.persist(&target)
            .with_context(|| format!("[io::atomic] Failed to rename onto {}", target.display()))?;
        sync_parent(&target);
        Ok(target)
    }

    /// Flush and fsync the temporary file without renaming it.
    fn prepare(self) -> Result<(PathBuf, NamedTempFile)> {
        let Self { target, tmp } = self;
        let tmp = tmp.into_inner()
            .map_err(|e| e.into_error())
            .with_context(|| format!("[io::atomic] Failed to flush {}", target.display()))?;
        tmp.as_file().sync_all().ok();
        Ok((target, tmp))
    }
}

impl Write for PendingWrite {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> { self.tmp.write(buf) }
    fn flush(&mut self) -> std::io::Result<()> { self.tmp.flush() }
}

/// A group of outputs that become visible together: each is fully written to
/// its temporary file before any of them is renamed into place, and a rename
/// that fails puts every earlier target back as it was.
#[derive(Default)]
pub struct StagedOutputs {
    pending: Vec<PendingWrite>,
}

impl StagedOutputs {
    pub fn new() -> Self { Self::default() }

    /// Stage one file; `write` fills it.
    pub fn stage(&mut self, target: &Path, write: impl FnOnce(&mut PendingWrite) -> Result<()>) -> Result<()> {
        let mut pending = PendingWrite::create(target)?;
        write(&mut pending)?;
        self.pending.push(pending);
        Ok(())
    }

    #[inline] pub fn len(&self) -> usize { self.pending.len() }
    #[inline] pub fn is_empty(&self) -> bool { self.pending.is_empty() }

    /// Rename every staged file onto its target, in staging order.
    ///
    /// Existing targets are moved aside first and only deleted once every
    /// rename has succeeded. On failure the new files are removed and the
    /// previous ones restored.
    pub fn commit(self) -> Result<Vec<PathBuf>> {
        let prepared = self.pending.into_iter()
            .map(PendingWrite::prepare)
            .collect::<Result<Vec<_>>>()?;

        let mut previous: Vec<(PathBuf, Option<TempPath>)> = Vec::with_capacity(prepared.len());
        for (target, _) in &prepared {
            match set_aside(target) {
                Ok(backup) => previous.push((target.clone(), backup)),
                Err(err) => {
                    roll_back(&[], previous);
                    return Err(err);
                }
            }
        }

        let mut committed = Vec::with_capacity(prepared.len());
        for (target, tmp) in prepared {
            if let Err(err) = tmp.persist(&target) {
                roll_back(&committed, previous);
                return Err(anyhow::Error::new(err.error)
                    .context(format!("[io::atomic] Failed to rename onto {}", target.display())));
            }
            sync_parent(&target);
            committed.push(target);
        }
        Ok(committed)
    }
}

fn parent_dir(target: &Path) -> &Path {
    target.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."))
}

fn sync_parent(target: &Path) {
    let _ = File::open(parent_dir(target)).and_then(|f| f.sync_all());
}

/// Move an existing target to a temporary name in the same directory.
/// The backup is deleted when the returned path is dropped.
fn set_aside(target: &Path) -> Result<Option<TempPath>> {
    if !target.exists() { return Ok(None) }
    let dir = parent_dir(target);
    let backup = tempfile::Builder::new()
        .prefix(".prev")
        .tempfile_in(dir)
        .with_context(|| format!("[io::atomic] Failed to create backup in {}", dir.display()))?
        .into_temp_path();
    fs::rename(target, &backup)
        .with_context(|| format!("[io::atomic] Failed to move {} aside", target.display()))?;
    Ok(Some(backup))
}

/// Best effort: drop committed files, then move every backup back.
fn roll_back(committed: &[PathBuf], previous: Vec<(PathBuf, Option<TempPath>)>) {
    for target in committed {
        let _ = fs::remove_file(target);
    }
    for (target, backup) in previous {
        if let Some(backup) = backup {
            if let Err(err) = fs::rename(&backup, &target) {
                warn!(target = %target.display(), "[io::atomic] Failed to restore previous file: {err}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_appears_only_on_finish() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("nested").join("out.txt");

        let mut pending = PendingWrite::create(&target).unwrap();
        pending.write_all(b"hello").unwrap();
        assert!(!target.exists());
        pending.finish().unwrap();
        assert_eq!(fs::read_to_string(&target).unwrap(), "hello");
    }

    #[test]
    fn failed_stage_commits_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.txt");
        let b = dir.path().join("b.txt");

        let mut staged = StagedOutputs::new();
        staged.stage(&a, |w| Ok(w.write_all(b"a")?)).unwrap();
        assert!(staged.stage(&b, |_| anyhow::bail!("boom")).is_err());
        drop(staged);

        assert!(!a.exists());
        assert!(!b.exists());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn commit_replaces_previous_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.txt");
        fs::write(&a, "old").unwrap();

        let mut staged = StagedOutputs::new();
        staged.stage(&a, |w| Ok(w.write_all(b"new")?)).unwrap();
        assert_eq!(staged.commit().unwrap(), vec![a.clone()]);

        assert_eq!(fs::read_to_string(&a).unwrap(), "new");
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn failed_rename_restores_earlier_targets() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.txt");
        let b = dir.path().join("sub").join("b.txt");
        fs::write(&a, "old").unwrap();

        let mut staged = StagedOutputs::new();
        staged.stage(&a, |w| Ok(w.write_all(b"new")?)).unwrap();
        staged.stage(&b, |w| Ok(w.write_all(b"b")?)).unwrap();
        fs::remove_dir_all(dir.path().join("sub")).unwrap();

        assert!(staged.commit().is_err());
        assert_eq!(fs::read_to_string(&a).unwrap(), "old");
        let names: Vec<_> = fs::read_dir(dir.path()).unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec!["a.txt".to_string()]);
    }
}
