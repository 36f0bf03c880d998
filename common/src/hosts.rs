//! Static host directory, keyed by deployment environment

/// Deployment environment selecting the target host list
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Environment {
    Qa,
    Prod,
}

/// Environment name outside the supported set
#[derive(Debug, thiserror::Error)]
#[error("unknown environment: {0}")]
pub struct UnknownEnvironmentError(String);

impl std::str::FromStr for Environment {
    type Err = UnknownEnvironmentError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        match name {
            "qa" => Ok(Environment::Qa),
            "prod" => Ok(Environment::Prod),
            other => Err(UnknownEnvironmentError(other.to_string())),
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Qa => write!(f, "qa"),
            Environment::Prod => write!(f, "prod"),
        }
    }
}

/// Ordered list of copy targets for an environment.
///
/// The lists are fixed; changing a fleet means changing this table.
pub fn hosts_for(environment: Environment) -> &'static [&'static str] {
    match environment {
        Environment::Qa => &["qatools1", "qatools2", "qatools3"],
        Environment::Prod => &["prodtools3"],
    }
}
