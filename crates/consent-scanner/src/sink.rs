//! Categorized line files for presence outcomes.
//!
//! Every outcome lands in exactly one file, one domain per line. Files are
//! opened in append mode, so a second run over the same list adds its lines to
//! the first run's.

use crate::error::{Result, ScanError};
use consent_core::{CmpType, FetchOutcome, FetchStatus};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// File a presence outcome is written to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeCategory {
    Cookiebot,
    OneTrust,
    Termly,
    NoCmp,
    ConnectionFailed,
    HttpError,
    BotBlocked,
    Timeout,
}

impl OutcomeCategory {
    pub const ALL: [OutcomeCategory; 8] = [
        Self::Cookiebot,
        Self::OneTrust,
        Self::Termly,
        Self::NoCmp,
        Self::ConnectionFailed,
        Self::HttpError,
        Self::BotBlocked,
        Self::Timeout,
    ];

    pub fn from_outcome(outcome: &FetchOutcome) -> Self {
        match outcome.status {
            FetchStatus::Ok => match outcome.matched_cmp {
                Some(CmpType::Cookiebot) => Self::Cookiebot,
                Some(CmpType::OneTrust) => Self::OneTrust,
                Some(CmpType::Termly) => Self::Termly,
                None => Self::NoCmp,
            },
            FetchStatus::Timeout => Self::Timeout,
            FetchStatus::ConnectionError => Self::ConnectionFailed,
            FetchStatus::BotBlocked => Self::BotBlocked,
            FetchStatus::HttpError => Self::HttpError,
        }
    }

    pub fn file_name(self) -> &'static str {
        match self {
            Self::Cookiebot => "cookiebot_responses.txt",
            Self::OneTrust => "onetrust_responses.txt",
            Self::Termly => "termly_responses.txt",
            Self::NoCmp => "nocmp_responses.txt",
            Self::ConnectionFailed => "failed_urls.txt",
            Self::HttpError => "http_responses.txt",
            Self::BotBlocked => "bot_responses.txt",
            Self::Timeout => "crawler_timeouts.txt",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cookiebot => "cookiebot",
            Self::OneTrust => "onetrust",
            Self::Termly => "termly",
            Self::NoCmp => "nocmp",
            Self::ConnectionFailed => "connection_error",
            Self::HttpError => "http_error",
            Self::BotBlocked => "bot_blocked",
            Self::Timeout => "timeout",
        }
    }

    pub fn is_failure(self) -> bool {
        !matches!(
            self,
            Self::Cookiebot | Self::OneTrust | Self::Termly | Self::NoCmp
        )
    }
}

impl fmt::Display for OutcomeCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Append-only category files, one lock per file.
#[derive(Debug)]
pub struct CategorizedSink {
    dir: PathBuf,
    files: HashMap<OutcomeCategory, Mutex<File>>,
}

impl CategorizedSink {
    /// Open (creating if needed) every category file under `dir`.
    pub async fn open(dir: &Path) -> Result<Self> {
        let mut files = HashMap::with_capacity(OutcomeCategory::ALL.len());
        for category in OutcomeCategory::ALL {
            let path = dir.join(category.file_name());
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await
                .map_err(|e| ScanError::OutputDirectory {
                    path: path.clone(),
                    reason: e.to_string(),
                })?;
            files.insert(category, Mutex::new(file));
        }

        Ok(Self {
            dir: dir.to_path_buf(),
            files,
        })
    }

    /// Append one domain line to a category file.
    pub async fn append(&self, category: OutcomeCategory, domain: &str) -> Result<()> {
        let Some(file) = self.files.get(&category) else {
            return Err(ScanError::OutputDirectory {
                path: self.path(category),
                reason: "category file not open".to_string(),
            });
        };

        let line = format!("{domain}\n");
        let mut file = file.lock().await;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    pub fn path(&self, category: OutcomeCategory) -> PathBuf {
        self.dir.join(category.file_name())
    }
}
