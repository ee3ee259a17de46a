use clap::ValueEnum;
use std::fmt::{Debug, Display, Formatter};
use std::str::FromStr;

/// Which deployment of the job dispatcher to talk to.
#[derive(Clone, Default, Copy, PartialEq, Eq, ValueEnum, Debug)]
pub enum EnvironmentType {
    /// Public EBI services.
    #[default]
    Production,
    /// EBI development deployment.
    Development,
    /// A dispatcher running on this machine.
    Local,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Environment {
    pub env_type: EnvironmentType,
    /// Overrides the environment's own service URL when set.
    pub base_url: Option<String>,
}

impl Environment {
    pub fn new(env_type: EnvironmentType) -> Self {
        Self {
            env_type,
            base_url: None,
        }
    }

    pub fn with_base_url(mut self, base_url: Option<String>) -> Self {
        self.base_url = base_url.filter(|url| !url.trim().is_empty());
        self
    }

    /// Root of the REST services; each tool lives under `<root>/<tool>`.
    pub fn service_url(&self) -> String {
        if let Some(url) = &self.base_url {
            return url.clone();
        }
        match self.env_type {
            EnvironmentType::Production => "https://www.ebi.ac.uk/Tools/services/rest".to_string(),
            EnvironmentType::Development => {
                "https://wwwdev.ebi.ac.uk/Tools/services/rest".to_string()
            }
            EnvironmentType::Local => "http://localhost:8080/Tools/services/rest".to_string(),
        }
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::new(EnvironmentType::default())
    }
}

impl FromStr for Environment {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<EnvironmentType>().map(Environment::new)
    }
}

impl FromStr for EnvironmentType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "production" | "prod" => Ok(EnvironmentType::Production),
            "development" | "dev" => Ok(EnvironmentType::Development),
            "local" => Ok(EnvironmentType::Local),
            _ => Err(()),
        }
    }
}

impl Display for EnvironmentType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            EnvironmentType::Production => write!(f, "production"),
            EnvironmentType::Development => write!(f, "development"),
            EnvironmentType::Local => write!(f, "local"),
        }
    }
}

impl Display for Environment {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.env_type, self.service_url())
    }
}
