#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use vvexec::config::{
    BatchSection, ConfigFile, ConfigSection, DefaultSection, FileSpec, RawConfigFile, TestConfig,
};
use vvexec::types::DequeuePolicy;

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self {
            config: RawConfigFile {
                config: ConfigSection::default(),
                default: DefaultSection::default(),
                batch: BatchSection::default(),
                test: BTreeMap::new(),
            },
        }
    }

    pub fn with_test(mut self, xdir: &str, test: TestConfig) -> Self {
        self.config.test.insert(xdir.to_string(), test);
        self
    }

    pub fn processors(mut self, n: u32) -> Self {
        self.config.config.processors = Some(n);
        self
    }

    pub fn dequeue_policy(mut self, policy: DequeuePolicy) -> Self {
        self.config.config.dequeue_policy = policy;
        self
    }

    pub fn test_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.config.config.test_root = root.into();
        self
    }

    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.config.default.timeout = Some(timeout);
        self
    }

    pub fn batch(mut self, batch: BatchSection) -> Self {
        self.config.batch = batch;
        self
    }

    /// The unvalidated config, for tests of validation itself.
    pub fn raw(self) -> RawConfigFile {
        self.config
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `TestConfig`.
pub struct TestConfigBuilder {
    test: TestConfig,
}

impl TestConfigBuilder {
    pub fn new(command: &[&str]) -> Self {
        Self {
            test: TestConfig {
                command: command.iter().map(|s| s.to_string()).collect(),
                np: None,
                timeout: None,
                keywords: vec![],
                parent: None,
                source_dir: None,
                link_files: vec![],
                copy_files: vec![],
            },
        }
    }

    pub fn np(mut self, np: u32) -> Self {
        self.test.np = Some(np);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.test.timeout = Some(timeout);
        self
    }

    pub fn keyword(mut self, keyword: &str) -> Self {
        self.test.keywords.push(keyword.to_string());
        self
    }

    pub fn parent(mut self, xdir: &str) -> Self {
        self.test.parent = Some(xdir.to_string());
        self
    }

    pub fn source_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.test.source_dir = Some(dir.into());
        self
    }

    pub fn link(mut self, src: &str, dest: Option<&str>) -> Self {
        self.test.link_files.push(FileSpec {
            src: src.to_string(),
            dest: dest.map(str::to_string),
        });
        self
    }

    pub fn copy(mut self, src: &str, dest: Option<&str>) -> Self {
        self.test.copy_files.push(FileSpec {
            src: src.to_string(),
            dest: dest.map(str::to_string),
        });
        self
    }

    pub fn build(self) -> TestConfig {
        self.test
    }
}
