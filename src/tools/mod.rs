//! Tool catalogue
//!
//! Every dispatcher tool is described by a row in `resources/tools.json`:
//! its usage text and the options it accepts. The CLI binds raw arguments
//! against these tables instead of carrying one hand-written client per tool.

mod binder;

pub use binder::ArgumentBinder;

use crate::error::ClientError;
use once_cell::sync::OnceCell;
use serde::Deserialize;
use std::fmt::Write as _;

static BUILTIN: OnceCell<ToolCatalogue> = OnceCell::new();
const BUILTIN_JSON: &str = include_str!("../../resources/tools.json");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptionKind {
    String,
    Int,
    Float,
    /// One of a fixed set of values.
    Choice,
    /// Boolean with an enabling and a disabling switch.
    Flag,
    /// Sequence data: a file path, `-` for stdin, or literal text.
    Sequence,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OptionSpec {
    pub name: String,
    pub kind: OptionKind,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub choices: Vec<String>,
    /// Switch that sets a flag to false, e.g. `nofilter`.
    #[serde(default)]
    pub disable: Option<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub multiple: bool,
    #[serde(default)]
    pub default: Option<String>,
    #[serde(default)]
    pub help: String,
}

impl OptionSpec {
    /// `--name <kind>` or `--name|--noname` as shown in usage text.
    pub fn synopsis(&self) -> String {
        match (self.kind, &self.disable) {
            (OptionKind::Flag, Some(disable)) => format!("--{}|--{}", self.name, disable),
            (OptionKind::Flag, None) => format!("--{}", self.name),
            (OptionKind::Choice, _) => format!("--{} <{}>", self.name, self.choices.join("|")),
            (kind, _) => format!("--{} <{}>", self.name, format!("{:?}", kind).to_lowercase()),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub title: String,
    pub usage: String,
    pub options: Vec<OptionSpec>,
}

impl ToolSchema {
    /// First option carrying sequence data; multi-FASTA batches split this one.
    pub fn sequence_option(&self) -> Option<&OptionSpec> {
        self.options.iter().find(|o| o.kind == OptionKind::Sequence)
    }

    pub fn usage_text(&self) -> String {
        let mut out = format!("{}\n\n{}\n\nTool options (after `--`):\n", self.title, self.usage);
        let width = self
            .options
            .iter()
            .map(|o| o.synopsis().len())
            .max()
            .unwrap_or(0);
        for option in &self.options {
            let _ = write!(out, "  {:<width$}  {}", option.synopsis(), option.help);
            if option.required {
                out.push_str(" (required)");
            }
            if let Some(default) = &option.default {
                let _ = write!(out, " [default: {}]", default);
            }
            if !option.aliases.is_empty() {
                let aliases: Vec<String> =
                    option.aliases.iter().map(|a| format!("-{}", a)).collect();
                let _ = write!(out, " [aliases: {}]", aliases.join(", "));
            }
            out.push('\n');
        }
        out
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ToolCatalogue {
    tools: Vec<ToolSchema>,
}

impl ToolCatalogue {
    /// The catalogue compiled into the binary.
    pub fn builtin() -> Result<&'static ToolCatalogue, ClientError> {
        BUILTIN.get_or_try_init(|| Self::from_json(BUILTIN_JSON))
    }

    pub fn from_json(json: &str) -> Result<Self, ClientError> {
        let catalogue: ToolCatalogue = serde_json::from_str(json)
            .map_err(|e| ClientError::Config(format!("invalid tool catalogue: {}", e)))?;
        for tool in &catalogue.tools {
            ArgumentBinder::new(tool)?;
        }
        Ok(catalogue)
    }

    pub fn tools(&self) -> &[ToolSchema] {
        &self.tools
    }

    pub fn get(&self, name: &str) -> Result<&ToolSchema, ClientError> {
        self.tools.iter().find(|t| t.name == name).ok_or_else(|| {
            let known: Vec<&str> = self.tools.iter().map(|t| t.name.as_str()).collect();
            ClientError::usage(format!(
                "unknown tool {:?}; known tools: {}",
                name,
                known.join(", ")
            ))
        })
    }
}
