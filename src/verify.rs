//! Post-run verification by re-reading the filesystem.
//!
//! Deliberately ignores the fetch pool's own bookkeeping: every expected
//! destination is re-stat'ed, so a result that claimed success but whose file
//! was truncated or removed out-of-band still fails the run.

use std::{fs, path::PathBuf};

use tracing::error;

use crate::request::DownloadTask;

/// Floor applied when a task carries no expected size. Catches the empty
/// bodies the filter occasionally serves for not-yet-published data.
const MIN_FILE_BYTES: u64 = 1;

#[derive(Debug, Default)]
pub struct VerificationReport {
    pub verified: usize,
    pub missing: Vec<PathBuf>,
    pub undersized: Vec<PathBuf>,
}

impl VerificationReport {
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty() && self.undersized.is_empty()
    }

    pub fn failed(&self) -> usize {
        self.missing.len() + self.undersized.len()
    }
}

pub fn verify(tasks: &[DownloadTask]) -> VerificationReport {
    let mut report = VerificationReport::default();

    for task in tasks {
        let required = task.min_bytes.max(MIN_FILE_BYTES);
        match fs::metadata(&task.dest) {
            Ok(meta) if meta.len() >= required => report.verified += 1,
            Ok(meta) => {
                error!(
                    "undersized: {} ({} of at least {} bytes)",
                    task.dest.display(),
                    meta.len(),
                    required
                );
                report.undersized.push(task.dest.clone());
            }
            Err(_) => {
                error!("missing: {}", task.dest.display());
                report.missing.push(task.dest.clone());
            }
        }
    }

    report
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod test {
    use tempfile::TempDir;

    use super::*;

    fn task(dir: &TempDir, name: &str, min_bytes: u64) -> DownloadTask {
        DownloadTask {
            url: format!("http://example.invalid/{name}"),
            dest: dir.path().join(name),
            min_bytes,
        }
    }

    #[test]
    fn should_pass_when_every_file_is_present_and_sized() {
        let dir = TempDir::new().unwrap();
        let tasks = vec![task(&dir, "f000", 0), task(&dir, "f003", 0)];
        for t in &tasks {
            fs::write(&t.dest, b"GRIB data").unwrap();
        }

        let report = verify(&tasks);

        assert!(report.is_complete());
        assert_eq!(report.verified, 2);
    }

    #[test]
    fn should_report_absent_file_as_missing() {
        let dir = TempDir::new().unwrap();
        let tasks = vec![task(&dir, "f000", 0)];

        let report = verify(&tasks);

        assert_eq!(report.missing, vec![tasks[0].dest.clone()]);
        assert_eq!(report.failed(), 1);
    }

    #[test]
    fn should_report_missing_after_external_delete() {
        // The pool may have recorded success; verification must not trust it.
        let dir = TempDir::new().unwrap();
        let tasks = vec![task(&dir, "f000", 0)];
        fs::write(&tasks[0].dest, b"GRIB data").unwrap();
        fs::remove_file(&tasks[0].dest).unwrap();

        let report = verify(&tasks);

        assert_eq!(report.missing, vec![tasks[0].dest.clone()]);
    }

    #[test]
    fn should_report_empty_file_as_undersized() {
        let dir = TempDir::new().unwrap();
        let tasks = vec![task(&dir, "f000", 0)];
        fs::write(&tasks[0].dest, b"").unwrap();

        let report = verify(&tasks);

        assert_eq!(report.undersized, vec![tasks[0].dest.clone()]);
        assert!(!report.is_complete());
    }

    #[test]
    fn should_honour_expected_minimum_size() {
        let dir = TempDir::new().unwrap();
        let tasks = vec![task(&dir, "f000", 100)];
        fs::write(&tasks[0].dest, b"too short").unwrap();

        let report = verify(&tasks);

        assert_eq!(report.undersized, vec![tasks[0].dest.clone()]);
    }
}
