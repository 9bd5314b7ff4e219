use crate::domain::commit::CommitEvent;
use crate::domain::signal::Signal;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::info;

/// Append-only NDJSON persistence for one run.
///
/// Signals and commit events land in `signals.ndjson` and `commits.ndjson`
/// under `<runs_dir>/<run_id>/`, each line fsynced after the append. The
/// commit log is the complete mutation record: replaying it against a
/// fresh signal store reproduces the run's event emissions.
pub struct RunLog {
    dir: PathBuf,
    signals: File,
    commits: File,
}

impl RunLog {
    pub fn create(runs_dir: &Path, run_id: &str) -> io::Result<Self> {
        let dir = runs_dir.join(run_id);
        fs::create_dir_all(&dir)?;
        let signals = Self::open_append(&dir.join("signals.ndjson"))?;
        let commits = Self::open_append(&dir.join("commits.ndjson"))?;
        info!("RunLog: persisting run under {}", dir.display());
        Ok(Self {
            dir,
            signals,
            commits,
        })
    }

    fn open_append(path: &Path) -> io::Result<File> {
        OpenOptions::new().create(true).append(true).open(path)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Append a signal snapshot, then fsync.
    pub fn append_signal(&mut self, signal: &Signal) -> io::Result<()> {
        let line = serde_json::to_string(signal)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        writeln!(self.signals, "{}", line)?;
        self.signals.sync_data()
    }

    /// Append a commit event, then fsync.
    pub fn append_commit(&mut self, commit: &CommitEvent) -> io::Result<()> {
        let line = serde_json::to_string(commit)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        writeln!(self.commits, "{}", line)?;
        self.commits.sync_data()
    }

    /// Load a persisted commit log in append order.
    pub fn load_commits(run_dir: &Path) -> io::Result<Vec<CommitEvent>> {
        let file = File::open(run_dir.join("commits.ndjson"))?;
        let mut out = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let commit: CommitEvent = serde_json::from_str(&line)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            out.push(commit);
        }
        Ok(out)
    }
}
