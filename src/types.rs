use std::str::FromStr;
use serde::Deserialize;

/// Order in which pending units are considered inside a processor bin.
///
/// - `FastFirst`: units tagged with the `fast` keyword go ahead of the rest
///   of their bin (default).
/// - `LargeNonFastFirst`: a first pass skips `fast` units so that large,
///   long-running units claim slack processors; fast units are only taken
///   when nothing else fits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DequeuePolicy {
    FastFirst,
    LargeNonFastFirst,
}

impl Default for DequeuePolicy {
    fn default() -> Self {
        DequeuePolicy::FastFirst
    }
}

impl FromStr for DequeuePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "fast-first" => Ok(DequeuePolicy::FastFirst),
            "large-non-fast-first" => Ok(DequeuePolicy::LargeNonFastFirst),
            other => Err(format!(
                "invalid dequeue_policy: {other} (expected \"fast-first\" or \"large-non-fast-first\")"
            )),
        }
    }
}

/// Which batch queue manager jobs are submitted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchSystemKind {
    Slurm,
    Lsf,
}

impl Default for BatchSystemKind {
    fn default() -> Self {
        BatchSystemKind::Slurm
    }
}

impl FromStr for BatchSystemKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "slurm" => Ok(BatchSystemKind::Slurm),
            "lsf" => Ok(BatchSystemKind::Lsf),
            other => Err(format!(
                "invalid batch system: {other} (expected \"slurm\" or \"lsf\")"
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_from_str() {
        assert_eq!(
            "Large-Non-Fast-First".parse::<DequeuePolicy>(),
            Ok(DequeuePolicy::LargeNonFastFirst)
        );
        assert!("largest".parse::<DequeuePolicy>().is_err());
    }
}
