use crate::{
    deliver::{Deliver, Outbox, Sendmail},
    diff::GroupFilter,
};
use anyhow::Context;
use serde::Deserialize;
use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing::debug;

/// Everything a run needs besides its command line. Every field has a default, so an
/// empty (or absent) file is a valid configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct Config {
    pub directory: DirectoryConfig,
    pub groups: GroupsConfig,
    pub delivery: DeliveryConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct DirectoryConfig {
    pub base_url: String,
    pub root_group: String,
    /// File holding the API token. Kept out of the config itself so the config can be
    /// versioned.
    pub token_file: PathBuf,
    /// Malformed entries tolerated before a fetch is rejected.
    pub max_malformed: usize,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.ci-connect.net/v1alpha1".into(),
            root_group: "root.osg".into(),
            token_file: "token".into(),
            max_malformed: 25,
        }
    }
}

impl DirectoryConfig {
    pub fn read_token(&self) -> Result<String, anyhow::Error> {
        let token = fs::read_to_string(&self.token_file)
            .with_context(|| format!("cannot read token file {}", self.token_file.display()))?;
        let token = token.trim();
        anyhow::ensure!(
            !token.is_empty(),
            "token file {} is empty",
            self.token_file.display()
        );
        Ok(token.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct GroupsConfig {
    pub training: Vec<String>,
    /// JSON array of training group names, merged with `training`.
    pub training_file: Option<PathBuf>,
    pub exclude: Vec<String>,
}

impl Default for GroupsConfig {
    fn default() -> Self {
        Self {
            training: Vec::new(),
            training_file: None,
            exclude: vec!["root".into(), "root.osg".into()],
        }
    }
}

impl GroupsConfig {
    pub fn filter(&self) -> Result<GroupFilter, anyhow::Error> {
        let mut training = self.training.clone();
        if let Some(path) = &self.training_file {
            let content = fs::read_to_string(path)
                .with_context(|| format!("cannot read training groups {}", path.display()))?;
            let listed: Vec<String> = serde_json::from_str(&content)
                .with_context(|| format!("cannot decode training groups {}", path.display()))?;
            training.extend(listed);
        }
        debug!(?training, exclude = ?self.exclude, "group filter");
        Ok(GroupFilter::new(training, self.exclude.iter().cloned()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct DeliveryConfig {
    pub from: String,
    /// Used when no `--to` is given on the command line.
    pub recipients: Vec<String>,
    pub sendmail: PathBuf,
    /// When set, reports are written there instead of being sent.
    pub outbox: Option<PathBuf>,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            from: "account-report@localhost".into(),
            recipients: Vec::new(),
            sendmail: "/usr/sbin/sendmail".into(),
            outbox: None,
        }
    }
}

impl DeliveryConfig {
    pub fn deliverer(&self) -> Box<dyn Deliver> {
        match &self.outbox {
            Some(dir) => Box::new(Outbox {
                dir: dir.clone(),
                from: self.from.clone(),
            }),
            None => Box::new(Sendmail {
                program: self.sendmail.clone(),
                from: self.from.clone(),
            }),
        }
    }
}

impl Config {
    /// Reads the configuration at `path`. A missing file is only an error when the
    /// path was asked for explicitly. Relative paths inside the file are taken
    /// relative to the file's own directory.
    pub fn load(path: &Path, required: bool) -> Result<Self, anyhow::Error> {
        if !required && !path.exists() {
            debug!(path = %path.display(), "no configuration file, using defaults");
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("cannot read configuration {}", path.display()))?;
        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("invalid configuration {}", path.display()))?;
        if let Some(base) = path.parent() {
            config.resolve_paths(base);
        }
        Ok(config)
    }

    fn resolve_paths(&mut self, base: &Path) {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        resolve(&mut self.directory.token_file);
        if let Some(p) = self.groups.training_file.as_mut() {
            resolve(p);
        }
        if let Some(p) = self.delivery.outbox.as_mut() {
            resolve(p);
        }
    }
}
