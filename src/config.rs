use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::mail::InternalRecipient;

pub const CONFIG_FILE: &str = "k1mail.json";

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Config {
    /// Mailbox the messages are sent from; test mode delivers everything here.
    #[serde(default)]
    pub sender: String,
    #[serde(default)]
    pub internal_recipients: Vec<InternalRecipient>,
    #[serde(default)]
    pub tax_year: String,
    #[serde(default = "default_test_mode")]
    pub test_mode: bool,
    #[serde(default)]
    pub email_limit: Option<usize>,
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
    #[serde(default)]
    pub sync_dir: Option<PathBuf>,
}

fn default_test_mode() -> bool {
    true
}

fn default_work_dir() -> PathBuf {
    PathBuf::from(".")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sender: String::new(),
            internal_recipients: Vec::new(),
            tax_year: String::new(),
            test_mode: default_test_mode(),
            email_limit: None,
            work_dir: default_work_dir(),
            sync_dir: None,
        }
    }
}

impl Config {
    /// Defaults when the file does not exist. A file that exists but cannot
    /// be read or parsed is an error, so the caller can report it.
    pub fn load(path: &Path) -> Result<Config> {
        if !path.exists() {
            return Ok(Config::default());
        }
        let contents = std::fs::read_to_string(path).with_context(|| format!("reading config {:?}", path))?;
        let config = serde_json::from_str(&contents).with_context(|| format!("parsing config {:?}", path))?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents).with_context(|| format!("writing config {:?}", path))?;
        Ok(())
    }

    pub fn workspace(&self) -> Workspace {
        Workspace::new(&self.work_dir)
    }

    /// Values a send cannot go without.
    pub fn check_send_settings(&self) -> Result<()> {
        if self.sender.trim().is_empty() {
            anyhow::bail!("No sender configured (set \"sender\" in {} or pass --sender)", CONFIG_FILE);
        }
        if self.tax_year.trim().is_empty() {
            anyhow::bail!("No tax year configured (set \"tax_year\" in {} or pass --tax-year)", CONFIG_FILE);
        }
        Ok(())
    }
}

/// Fixed layout under the working directory.
#[derive(Clone, Debug)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn files_dir(&self) -> PathBuf {
        self.root.join("files")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.root.join("cache")
    }

    pub fn cache_file(&self) -> PathBuf {
        self.cache_dir().join("k1_cache.bin")
    }

    pub fn dumps_dir(&self) -> PathBuf {
        self.root.join("dumps")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn snapshots_dir(&self) -> PathBuf {
        self.root.join("snapshots")
    }

    pub fn investors_path(&self) -> PathBuf {
        self.root.join("investors.xlsx")
    }

    /// Creates the output directories. `files/` is input and must already exist
    /// for extraction, but creating it keeps a fresh workspace usable.
    pub fn ensure(&self) -> Result<()> {
        for dir in [
            self.files_dir(),
            self.cache_dir(),
            self.dumps_dir(),
            self.logs_dir(),
            self.snapshots_dir(),
        ] {
            if !dir.exists() {
                std::fs::create_dir_all(&dir).with_context(|| format!("creating {:?}", dir))?;
            }
        }
        Ok(())
    }
}
