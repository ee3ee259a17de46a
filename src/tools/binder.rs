use crate::consts::cli::STDIN_SENTINEL;
use crate::error::ClientError;
use crate::job::ParamSet;
use crate::tools::{OptionKind, OptionSpec, ToolSchema};
use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

#[derive(Debug, Clone, Copy)]
enum Switch {
    /// Option taking a value, or the enabling form of a flag.
    Set(usize),
    /// Disabling form of a flag.
    Unset(usize),
}

/// Binds raw `--option value` tokens to a tool's option table.
pub struct ArgumentBinder<'a> {
    schema: &'a ToolSchema,
    /// Canonical names, aliases and disable switches in one lookup.
    switches: HashMap<String, Switch>,
}

impl<'a> ArgumentBinder<'a> {
    pub fn new(schema: &'a ToolSchema) -> Result<Self, ClientError> {
        let mut switches = HashMap::new();
        for (idx, option) in schema.options.iter().enumerate() {
            let names = std::iter::once(&option.name)
                .chain(option.aliases.iter())
                .map(|name| (name, Switch::Set(idx)))
                .chain(option.disable.iter().map(|name| (name, Switch::Unset(idx))));
            for (name, switch) in names {
                if switches.insert(name.clone(), switch).is_some() {
                    return Err(ClientError::Config(format!(
                        "tool {}: switch --{} is declared twice",
                        schema.name, name
                    )));
                }
            }
        }
        Ok(Self { schema, switches })
    }

    pub fn bind(&self, args: &[String]) -> Result<ParamSet, ClientError> {
        let mut params = ParamSet::new();
        let mut tokens = args.iter();

        while let Some(token) = tokens.next() {
            let stripped = token
                .strip_prefix("--")
                .or_else(|| token.strip_prefix('-'))
                .filter(|s| !s.is_empty())
                .ok_or_else(|| {
                    ClientError::usage(format!(
                        "unexpected argument {:?} for {}",
                        token, self.schema.name
                    ))
                })?;
            let (key, inline) = match stripped.split_once('=') {
                Some((key, value)) => (key, Some(value.to_string())),
                None => (stripped, None),
            };
            let switch = self.switches.get(key).copied().ok_or_else(|| {
                ClientError::usage(format!(
                    "unknown option --{} for {} (see `ebi usage {}`)",
                    key, self.schema.name, self.schema.name
                ))
            })?;

            match switch {
                Switch::Unset(idx) => {
                    if inline.is_some() {
                        return Err(ClientError::usage(format!("--{} takes no value", key)));
                    }
                    params.set(&self.schema.options[idx].name, "false");
                }
                Switch::Set(idx) => {
                    let option = &self.schema.options[idx];
                    if option.kind == OptionKind::Flag {
                        let value = match inline {
                            Some(v) => parse_bool(option, &v)?,
                            None => true,
                        };
                        params.set(&option.name, value.to_string());
                        continue;
                    }
                    let raw = match inline {
                        Some(v) => v,
                        None => tokens.next().cloned().ok_or_else(|| {
                            ClientError::usage(format!("option --{} needs a value", key))
                        })?,
                    };
                    self.bind_value(option, &raw, &mut params)?;
                }
            }
        }

        for option in &self.schema.options {
            if params.contains(&option.name) {
                continue;
            }
            if let Some(default) = &option.default {
                params.set(&option.name, default.clone());
            } else if option.required {
                return Err(ClientError::usage(format!(
                    "{} requires --{}",
                    self.schema.name, option.name
                )));
            }
        }
        Ok(params)
    }

    fn bind_value(
        &self,
        option: &OptionSpec,
        raw: &str,
        params: &mut ParamSet,
    ) -> Result<(), ClientError> {
        if option.kind == OptionKind::Sequence {
            params.set(&option.name, read_sequence(raw)?);
            return Ok(());
        }
        if !option.multiple {
            params.set(&option.name, validate(option, raw.trim())?);
            return Ok(());
        }
        for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            params.push(&option.name, validate(option, part)?);
        }
        Ok(())
    }
}

fn validate(option: &OptionSpec, value: &str) -> Result<String, ClientError> {
    let ok = match option.kind {
        OptionKind::Int => value.parse::<i64>().is_ok(),
        OptionKind::Float => value.parse::<f64>().is_ok(),
        OptionKind::Choice => option.choices.iter().any(|c| c == value),
        OptionKind::String | OptionKind::Sequence | OptionKind::Flag => !value.is_empty(),
    };
    if ok {
        return Ok(value.to_string());
    }
    let expected = match option.kind {
        OptionKind::Int => "an integer".to_string(),
        OptionKind::Float => "a number".to_string(),
        OptionKind::Choice => format!("one of {}", option.choices.join(", ")),
        _ => "a value".to_string(),
    };
    Err(ClientError::usage(format!(
        "invalid value {:?} for --{}: expected {}",
        value, option.name, expected
    )))
}

fn parse_bool(option: &OptionSpec, value: &str) -> Result<bool, ClientError> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" | "on" => Ok(true),
        "false" | "no" | "0" | "off" => Ok(false),
        _ => Err(ClientError::usage(format!(
            "invalid value {:?} for --{}: expected true or false",
            value, option.name
        ))),
    }
}

/// `-` reads stdin, an existing path reads that file, anything else is the sequence itself.
fn read_sequence(value: &str) -> Result<String, ClientError> {
    if value == STDIN_SENTINEL {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        return Ok(buf);
    }
    let path = Path::new(value);
    if path.is_file() {
        return Ok(std::fs::read_to_string(path)?);
    }
    if value.trim().is_empty() {
        return Err(ClientError::usage("empty sequence"));
    }
    Ok(value.to_string())
}
