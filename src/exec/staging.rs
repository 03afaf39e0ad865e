// src/exec/staging.rs

//! Link/copy input files into an execute directory.

use std::fs;
use std::io;
use std::os::unix::fs::symlink;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};
use globset::GlobBuilder;
use walkdir::WalkDir;

use crate::config::model::FileSpec;
use crate::queue::TestUnit;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    Link,
    Copy,
}

impl StageKind {
    fn as_str(self) -> &'static str {
        match self {
            StageKind::Link => "link",
            StageKind::Copy => "copy",
        }
    }
}

/// One file to place in the execute directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageEntry {
    pub kind: StageKind,
    /// Absolute source path.
    pub source: PathBuf,
    /// File name inside the execute directory.
    pub dest: String,
}

/// Resolved staging actions for one unit. Resolution fails up front on a
/// missing source or an ambiguous glob so nothing is touched on disk.
#[derive(Debug, Clone, Default)]
pub struct StagingPlan {
    entries: Vec<StageEntry>,
}

impl StagingPlan {
    /// Resolve the unit's link and copy lists against `base`.
    ///
    /// The error string describes the offending entry.
    pub fn resolve(unit: &TestUnit, base: &Path) -> std::result::Result<Self, String> {
        let base = std::path::absolute(base)
            .map_err(|e| format!("cannot resolve source directory {base:?}: {e}"))?;

        let mut entries = Vec::new();
        for spec in &unit.link_files {
            entries.extend(resolve_spec(&base, spec, StageKind::Link)?);
        }
        for spec in &unit.copy_files {
            entries.extend(resolve_spec(&base, spec, StageKind::Copy)?);
        }
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[StageEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Materialize the plan, replacing whatever already sits at each target.
    ///
    /// An entry whose source is its own target is refused before anything
    /// is removed.
    pub fn apply(&self, exec_dir: &Path) -> Result<()> {
        for entry in &self.entries {
            let target = exec_dir.join(&entry.dest);
            if same_location(&entry.source, &target) {
                anyhow::bail!(
                    "{} source {:?} is its own target in {exec_dir:?}",
                    entry.kind.as_str(),
                    entry.source
                );
            }
        }
        for entry in &self.entries {
            let target = exec_dir.join(&entry.dest);
            remove_existing(&target).with_context(|| format!("removing old {target:?}"))?;
            match entry.kind {
                StageKind::Link => symlink(&entry.source, &target)
                    .with_context(|| format!("linking {:?} -> {target:?}", entry.source))?,
                StageKind::Copy => copy_path(&entry.source, &target)
                    .with_context(|| format!("copying {:?} -> {target:?}", entry.source))?,
            }
        }
        Ok(())
    }
}

fn is_glob(s: &str) -> bool {
    s.contains(['*', '?', '['])
}

fn resolve_spec(
    base: &Path,
    spec: &FileSpec,
    kind: StageKind,
) -> std::result::Result<Vec<StageEntry>, String> {
    let sources = if is_glob(&spec.src) {
        let matches = glob_matches(base, &spec.src)?;
        if matches.is_empty() {
            return Err(format!("{} source '{}' matches no files", kind.as_str(), spec.src));
        }
        if matches.len() > 1 {
            if let Some(dest) = &spec.dest {
                return Err(format!(
                    "{} source '{}' matches {} files but names the single destination '{}'",
                    kind.as_str(),
                    spec.src,
                    matches.len(),
                    dest
                ));
            }
        }
        matches
    } else {
        let path = base.join(&spec.src);
        if fs::symlink_metadata(&path).is_err() {
            return Err(format!("{} source does not exist: {}", kind.as_str(), path.display()));
        }
        vec![path]
    };

    sources
        .into_iter()
        .map(|source| {
            let dest = match &spec.dest {
                Some(dest) => dest.clone(),
                None => source
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .ok_or_else(|| format!("cannot derive a file name from '{}'", spec.src))?,
            };
            Ok(StageEntry { kind, source, dest })
        })
        .collect()
}

/// Expand `pattern` relative to `base`. The literal leading directories
/// are walked to the depth of the remaining glob components.
fn glob_matches(base: &Path, pattern: &str) -> std::result::Result<Vec<PathBuf>, String> {
    let mut root = base.to_path_buf();
    let mut rest: Vec<String> = Vec::new();
    for comp in Path::new(pattern).components() {
        let text = comp.as_os_str().to_string_lossy();
        if rest.is_empty() && !is_glob(&text) {
            match comp {
                Component::RootDir => root = PathBuf::from("/"),
                other => root.push(other.as_os_str()),
            }
        } else {
            rest.push(text.into_owned());
        }
    }

    let matcher = GlobBuilder::new(&rest.join("/"))
        .literal_separator(true)
        .build()
        .map_err(|e| format!("invalid glob '{pattern}': {e}"))?
        .compile_matcher();

    let depth = rest.len();
    let mut out = Vec::new();
    for entry in WalkDir::new(&root)
        .min_depth(depth)
        .max_depth(depth)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if let Ok(rel) = entry.path().strip_prefix(&root) {
            if matcher.is_match(rel) {
                out.push(entry.path().to_path_buf());
            }
        }
    }
    Ok(out)
}

/// Whether two paths name the same directory entry. Parents are
/// canonicalized; the final component is not followed, so an existing link
/// at `target` does not count as its source.
fn same_location(source: &Path, target: &Path) -> bool {
    let entry = |p: &Path| -> Option<PathBuf> {
        let parent = fs::canonicalize(p.parent()?).ok()?;
        Some(parent.join(p.file_name()?))
    };
    match (entry(source), entry(target)) {
        (Some(a), Some(b)) => a == b,
        _ => source == target,
    }
}

fn remove_existing(path: &Path) -> io::Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

fn copy_path(src: &Path, dst: &Path) -> Result<()> {
    if !src.is_dir() {
        fs::copy(src, dst)?;
        return Ok(());
    }
    for entry in WalkDir::new(src) {
        let entry = entry?;
        let rel = entry.path().strip_prefix(src)?;
        let target = dst.join(rel);
        let ft = entry.file_type();
        if ft.is_dir() {
            fs::create_dir_all(&target)?;
        } else if ft.is_symlink() {
            symlink(fs::read_link(entry.path())?, &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(src: &str, dest: Option<&str>) -> FileSpec {
        FileSpec {
            src: src.to_string(),
            dest: dest.map(str::to_string),
        }
    }

    fn unit_with(links: Vec<FileSpec>, copies: Vec<FileSpec>) -> TestUnit {
        let mut unit = TestUnit::new("t", vec!["true".into()]);
        unit.link_files = links;
        unit.copy_files = copies;
        unit
    }

    #[test]
    fn links_and_copies_land_in_exec_dir() {
        let src = tempfile::tempdir().unwrap();
        let xdir = tempfile::tempdir().unwrap();
        fs::write(src.path().join("mesh.g"), "mesh").unwrap();
        fs::create_dir(src.path().join("data")).unwrap();
        fs::write(src.path().join("data/a.txt"), "a").unwrap();

        let unit = unit_with(
            vec![spec("mesh.g", Some("input.g"))],
            vec![spec("data", None)],
        );
        let plan = StagingPlan::resolve(&unit, src.path()).unwrap();
        plan.apply(xdir.path()).unwrap();
        // Applying twice replaces existing targets.
        plan.apply(xdir.path()).unwrap();

        let link = xdir.path().join("input.g");
        assert!(fs::symlink_metadata(&link).unwrap().file_type().is_symlink());
        assert_eq!(fs::read_to_string(link).unwrap(), "mesh");
        assert_eq!(fs::read_to_string(xdir.path().join("data/a.txt")).unwrap(), "a");
    }

    #[test]
    fn glob_expands_to_every_match() {
        let src = tempfile::tempdir().unwrap();
        for name in ["a.exo", "b.exo", "c.txt"] {
            fs::write(src.path().join(name), name).unwrap();
        }
        let unit = unit_with(vec![spec("*.exo", None)], vec![]);
        let plan = StagingPlan::resolve(&unit, src.path()).unwrap();
        let dests: Vec<_> = plan.entries().iter().map(|e| e.dest.as_str()).collect();
        assert_eq!(dests, vec!["a.exo", "b.exo"]);
    }

    #[test]
    fn ambiguous_glob_with_explicit_dest_is_an_error() {
        let src = tempfile::tempdir().unwrap();
        fs::write(src.path().join("a.exo"), "").unwrap();
        fs::write(src.path().join("b.exo"), "").unwrap();
        let unit = unit_with(vec![spec("*.exo", Some("in.exo"))], vec![]);
        let err = StagingPlan::resolve(&unit, src.path()).unwrap_err();
        assert!(err.contains("matches 2 files"), "{err}");
    }

    #[test]
    fn source_inside_exec_dir_is_refused_and_left_intact() {
        let xdir = tempfile::tempdir().unwrap();
        fs::write(xdir.path().join("input.dat"), "precious").unwrap();

        let unit = unit_with(vec![spec("input.dat", None)], vec![]);
        let plan = StagingPlan::resolve(&unit, xdir.path()).unwrap();
        let err = plan.apply(xdir.path()).unwrap_err();
        assert!(format!("{err:#}").contains("its own target"), "{err:#}");

        let path = xdir.path().join("input.dat");
        assert!(!fs::symlink_metadata(&path).unwrap().file_type().is_symlink());
        assert_eq!(fs::read_to_string(path).unwrap(), "precious");
    }

    #[test]
    fn missing_sources_are_errors() {
        let src = tempfile::tempdir().unwrap();
        let unit = unit_with(vec![], vec![spec("nope.txt", None)]);
        assert!(StagingPlan::resolve(&unit, src.path()).is_err());
        let unit = unit_with(vec![spec("*.nope", None)], vec![]);
        assert!(StagingPlan::resolve(&unit, src.path()).is_err());
    }
}
