//! Detailed response log: full model text keyed by question id

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::{read_optional, timestamp, write_json_atomic, StoreError};
use crate::questions::QuestionId;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LogMetadata {
    model: String,
    #[serde(with = "timestamp")]
    created_at: DateTime<Utc>,
    #[serde(with = "timestamp")]
    last_updated: DateTime<Utc>,
}

/// Raw text captured for one question
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEntry {
    #[serde(with = "timestamp")]
    pub timestamp: DateTime<Utc>,
    /// The answering response
    pub analysis: String,
    /// The verifier's response, when verification ran
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LogDocument {
    metadata: LogMetadata,
    responses: BTreeMap<String, ResponseEntry>,
}

/// Append-mostly log of raw responses. Not consulted for resume decisions.
#[derive(Debug)]
pub struct ResponseLog {
    path: PathBuf,
    document: LogDocument,
}

impl ResponseLog {
    /// Open the log at `path`, merging into an existing file.
    ///
    /// An existing file that cannot be read or parsed is an error and is left
    /// untouched; callers run without the log rather than overwrite it.
    pub fn open(path: impl AsRef<Path>, model: &str) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();

        let document = match read_optional(&path)? {
            Some(content) => serde_json::from_str::<LogDocument>(&content).map_err(|e| {
                StoreError::Corrupt {
                    path: path.clone(),
                    message: e.to_string(),
                }
            })?,
            None => {
                let now = Utc::now();
                LogDocument {
                    metadata: LogMetadata {
                        model: model.to_string(),
                        created_at: now,
                        last_updated: now,
                    },
                    responses: BTreeMap::new(),
                }
            }
        };

        Ok(Self { path, document })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.document.responses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.document.responses.is_empty()
    }

    pub fn get(&self, id: &QuestionId) -> Option<&ResponseEntry> {
        self.document.responses.get(&id.to_string())
    }

    /// Store the responses for `id`, replacing any earlier entry, and save
    pub fn record(
        &mut self,
        id: &QuestionId,
        analysis: &str,
        verification: Option<&str>,
    ) -> Result<(), StoreError> {
        let now = Utc::now();
        self.document.responses.insert(
            id.to_string(),
            ResponseEntry {
                timestamp: now,
                analysis: analysis.to_string(),
                verification: verification.map(str::to_string),
            },
        );
        self.document.metadata.last_updated = now;
        write_json_atomic(&self.path, &self.document)
    }
}
