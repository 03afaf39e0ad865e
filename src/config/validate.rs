// src/config/validate.rs

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::{Result, VvexecError};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = crate::errors::VvexecError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(ConfigFile::new_unchecked(raw))
    }
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    ensure_has_tests(cfg)?;
    validate_global_config(cfg)?;
    validate_batch_config(cfg)?;
    validate_tests(cfg)?;
    validate_parent_links(cfg)?;
    validate_parent_graph(cfg)?;
    Ok(())
}

fn config_error(msg: impl Into<String>) -> VvexecError {
    VvexecError::ConfigError(msg.into())
}

fn ensure_has_tests(cfg: &RawConfigFile) -> Result<()> {
    if cfg.test.is_empty() {
        return Err(config_error(
            "config must contain at least one [test.<xdir>] section",
        ));
    }
    Ok(())
}

fn validate_global_config(cfg: &RawConfigFile) -> Result<()> {
    if cfg.config.processors == Some(0) {
        return Err(config_error("[config].processors must be >= 1 (got 0)"));
    }
    if cfg.config.poll_interval.is_zero() {
        return Err(config_error("[config].poll_interval must be non-zero"));
    }
    Ok(())
}

fn validate_batch_config(cfg: &RawConfigFile) -> Result<()> {
    let batch = &cfg.batch;
    if batch.max_jobs == 0 {
        return Err(config_error("[batch].max_jobs must be >= 1 (got 0)"));
    }
    if batch.units_per_job == 0 {
        return Err(config_error("[batch].units_per_job must be >= 1 (got 0)"));
    }
    if batch.ppn == Some(0) {
        return Err(config_error("[batch].ppn must be >= 1 (got 0)"));
    }
    if batch.timeouts.logcheck.is_zero() {
        return Err(config_error("[batch.timeouts].logcheck must be non-zero"));
    }
    Ok(())
}

fn validate_tests(cfg: &RawConfigFile) -> Result<()> {
    for (xdir, test) in cfg.test.iter() {
        if xdir.trim().is_empty() {
            return Err(config_error("test execute directory must not be empty"));
        }
        if test.command.is_empty() || test.command[0].trim().is_empty() {
            return Err(config_error(format!(
                "test '{xdir}' must have a non-empty `command`"
            )));
        }
        for spec in test.link_files.iter().chain(test.copy_files.iter()) {
            if spec.src.trim().is_empty() {
                return Err(config_error(format!(
                    "test '{xdir}' has a link/copy entry with an empty `src`"
                )));
            }
        }
    }
    Ok(())
}

fn validate_parent_links(cfg: &RawConfigFile) -> Result<()> {
    for (xdir, test) in cfg.test.iter() {
        if let Some(parent) = test.parent.as_deref() {
            if parent == xdir {
                return Err(config_error(format!(
                    "test '{xdir}' cannot be its own parent"
                )));
            }
            if !cfg.test.contains_key(parent) {
                return Err(config_error(format!(
                    "test '{xdir}' has unknown parent '{parent}'"
                )));
            }
        }
    }
    Ok(())
}

fn validate_parent_graph(cfg: &RawConfigFile) -> Result<()> {
    // Edge direction: child -> parent, the order in which they must finish.
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for xdir in cfg.test.keys() {
        graph.add_node(xdir.as_str());
    }

    for (xdir, test) in cfg.test.iter() {
        if let Some(parent) = test.parent.as_deref() {
            graph.add_edge(xdir.as_str(), parent, ());
        }
    }

    match toposort(&graph, None) {
        Ok(_order) => Ok(()),
        Err(cycle) => Err(config_error(format!(
            "cycle detected in parent links involving test '{}'",
            cycle.node_id()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> RawConfigFile {
        toml::from_str(text).expect("valid toml")
    }

    #[test]
    fn accepts_minimal_config() {
        let raw = parse(
            r#"
            [test.a]
            command = ["true"]
            "#,
        );
        assert!(ConfigFile::try_from(raw).is_ok());
    }

    #[test]
    fn rejects_unknown_parent() {
        let raw = parse(
            r#"
            [test.a]
            command = ["true"]
            parent = "nope"
            "#,
        );
        let err = ConfigFile::try_from(raw).unwrap_err();
        assert!(err.to_string().contains("unknown parent"));
    }

    #[test]
    fn rejects_parent_cycle() {
        let raw = parse(
            r#"
            [test.a]
            command = ["true"]
            parent = "b"

            [test.b]
            command = ["true"]
            parent = "a"
            "#,
        );
        let err = ConfigFile::try_from(raw).unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn rejects_zero_processors_and_empty_command() {
        let raw = parse(
            r#"
            [config]
            processors = 0

            [test.a]
            command = ["true"]
            "#,
        );
        assert!(ConfigFile::try_from(raw).is_err());

        let raw = parse(
            r#"
            [test.a]
            command = []
            "#,
        );
        assert!(ConfigFile::try_from(raw).is_err());
    }

    #[test]
    fn humantime_durations_are_parsed() {
        let raw = parse(
            r#"
            [config]
            interrupt_to_kill = "5s"

            [batch.timeouts]
            missing = "2m"

            [test.a]
            command = ["true"]
            timeout = "90s"
            "#,
        );
        let cfg = ConfigFile::try_from(raw).unwrap();
        assert_eq!(cfg.config.interrupt_to_kill.as_secs(), 5);
        assert_eq!(cfg.batch.timeouts.missing.as_secs(), 120);
        assert_eq!(cfg.batch.timeouts.script.as_secs(), 120);
        assert_eq!(cfg.test["a"].timeout.map(|d| d.as_secs()), Some(90));
    }
}
