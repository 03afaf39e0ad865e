// src/exec/clean.rs

//! Pre/post-run cleanup of an execute directory.

use std::fs;
use std::io;
use std::path::Path;

use tracing::debug;

pub const EXECUTE_LOG: &str = "execute.log";
pub const BASELINE_LOG: &str = "baseline.log";
pub const MACHINEFILE: &str = "machinefile";
/// Helper files written by the script generator share this prefix.
pub const UTIL_PREFIX: &str = "vvtest_util";

/// Names that survive a cleanup.
#[derive(Debug, Clone)]
pub struct KeepList {
    names: Vec<String>,
}

impl KeepList {
    /// Both log files, the machine file and any `vvtest_util*` file.
    pub fn standard() -> Self {
        Self {
            names: vec![
                EXECUTE_LOG.to_string(),
                BASELINE_LOG.to_string(),
                MACHINEFILE.to_string(),
            ],
        }
    }

    /// Also keep the launch script when it lives in the execute directory.
    pub fn with_script(mut self, program: &str) -> Self {
        let path = Path::new(program);
        let local = path.is_relative() && path.components().count() <= 2;
        if local {
            if let Some(name) = path.file_name() {
                self.names.push(name.to_string_lossy().into_owned());
            }
        }
        self
    }

    pub fn keeps(&self, name: &str) -> bool {
        name.starts_with(UTIL_PREFIX) || self.names.iter().any(|n| n == name)
    }
}

/// Remove every entry of `dir` not on the keep list. Returns how many
/// entries were removed.
pub fn clean_dir(dir: &Path, keep: &KeepList) -> io::Result<usize> {
    let mut removed = 0;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if keep.keeps(&name) {
            continue;
        }
        let path = entry.path();
        let ft = entry.file_type()?;
        if ft.is_dir() {
            fs::remove_dir_all(&path)?;
        } else {
            fs::remove_file(&path)?;
        }
        debug!(path = ?path, "removed");
        removed += 1;
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_logs_util_files_and_local_script() {
        let dir = tempfile::tempdir().unwrap();
        for name in [
            "execute.log",
            "baseline.log",
            "machinefile",
            "vvtest_util.py",
            "run.sh",
            "out.exo",
        ] {
            fs::write(dir.path().join(name), "").unwrap();
        }
        fs::create_dir(dir.path().join("scratch")).unwrap();

        let keep = KeepList::standard().with_script("./run.sh");
        assert_eq!(clean_dir(dir.path(), &keep).unwrap(), 2);

        let mut left: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        left.sort();
        assert_eq!(
            left,
            vec!["baseline.log", "execute.log", "machinefile", "run.sh", "vvtest_util.py"]
        );
    }

    #[test]
    fn scripts_outside_the_directory_are_not_kept() {
        let keep = KeepList::standard().with_script("/usr/bin/python3");
        assert!(!keep.keeps("python3"));
        let keep = KeepList::standard().with_script("sh");
        assert!(keep.keeps("sh"));
    }
}
