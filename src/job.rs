//! Job Model
//!
//! The values that flow between the lifecycle controller and the gateway:
//! * `JobRequest` (what gets submitted)
//! * `JobHandle` (what the service hands back)
//! * `JobStatus` and `ResultTypeDescriptor` (what polling reports).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use crate::consts::cli::DEFAULT_TITLE;

/// Tool options as submitted to the service: option name to one or more values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParamSet {
    values: BTreeMap<String, Vec<String>>,
}

impl ParamSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces any existing value for `name`.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values.insert(name.into(), vec![value.into()]);
    }

    /// Adds another value for a multi-valued option.
    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values.entry(name.into()).or_default().push(value.into());
    }

    pub fn get(&self, name: &str) -> Option<&[String]> {
        self.values.get(name).map(Vec::as_slice)
    }

    pub fn first(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(|v| v.first()).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Flattened `(name, value)` pairs, repeating the name for multi-valued options.
    pub fn pairs(&self) -> Vec<(&str, &str)> {
        self.values
            .iter()
            .flat_map(|(k, vs)| vs.iter().map(move |v| (k.as_str(), v.as_str())))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRequest {
    /// Contact address the service attaches to the job.
    pub email: Option<String>,
    pub title: String,
    pub params: ParamSet,
}

impl JobRequest {
    pub fn new(email: Option<String>, title: Option<String>, params: ParamSet) -> Self {
        Self {
            email,
            title: title.unwrap_or_else(|| DEFAULT_TITLE.to_string()),
            params,
        }
    }
}

/// Opaque job identifier assigned by the service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobHandle(String);

impl JobHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for JobHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobStatus {
    Pending,
    Running,
    Finished,
    Error,
    Failure,
    NotFound,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending | Self::Running)
    }

    /// Only a finished job has results to enumerate or fetch.
    pub fn has_results(&self) -> bool {
        matches!(self, Self::Finished)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Finished => "FINISHED",
            Self::Error => "ERROR",
            Self::Failure => "FAILURE",
            Self::NotFound => "NOT_FOUND",
        }
    }
}

impl Display for JobStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unrecognised job status {0:?}")]
pub struct UnknownStatus(pub String);

impl FromStr for JobStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().replace(' ', "_").as_str() {
            "PENDING" | "QUEUED" => Ok(Self::Pending),
            "RUNNING" => Ok(Self::Running),
            "FINISHED" => Ok(Self::Finished),
            "ERROR" => Ok(Self::Error),
            "FAILURE" => Ok(Self::Failure),
            "NOT_FOUND" => Ok(Self::NotFound),
            _ => Err(UnknownStatus(s.trim().to_string())),
        }
    }
}

/// One output format a finished job can produce.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultTypeDescriptor {
    pub identifier: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub media_type: String,
    pub file_suffix: String,
}

impl ResultTypeDescriptor {
    #[cfg(test)]
    pub fn new(identifier: &str, media_type: &str, file_suffix: &str) -> Self {
        Self {
            identifier: identifier.to_string(),
            label: None,
            description: None,
            media_type: media_type.to_string(),
            file_suffix: file_suffix.to_string(),
        }
    }

    pub fn is_text(&self) -> bool {
        self.media_type.starts_with("text")
    }
}

impl Display for ResultTypeDescriptor {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{}", self.identifier)?;
        if let Some(label) = &self.label {
            writeln!(f, "\t{}", label)?;
        }
        if let Some(description) = &self.description {
            writeln!(f, "\t{}", description)?;
        }
        writeln!(f, "\t{}", self.media_type)?;
        write!(f, "\t{}", self.file_suffix)
    }
}
