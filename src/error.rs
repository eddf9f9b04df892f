//! Process-level error taxonomy.
//!
//! Every fatal error the orchestrator can see, tagged with the component that
//! raised it. Any of them maps to exit code 1.

use thiserror::Error;

use crate::config::ConfigError;
use crate::http::RouterError;
use crate::k8s::{BootstrapError, ConnectionError, SchemeError};
use crate::manager::{ManagerError, SetupError};

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Scheme(#[from] SchemeError),

    #[error(transparent)]
    Setup(#[from] SetupError),

    #[error(transparent)]
    ManagerRuntime(#[from] ManagerError),

    #[error(transparent)]
    RouterLaunch(#[from] RouterError),
}

impl From<BootstrapError> for Error {
    fn from(err: BootstrapError) -> Self {
        match err {
            BootstrapError::Connection(e) => Error::Connection(e),
            BootstrapError::Scheme(e) => Error::Scheme(e),
        }
    }
}

impl Error {
    /// Component that raised the error, as used in log fields.
    pub fn component(&self) -> &'static str {
        match self {
            Error::Config(_) => "config",
            Error::Connection(_) | Error::Scheme(_) => "client",
            Error::Setup(_) | Error::ManagerRuntime(_) => "manager",
            Error::RouterLaunch(_) => "router",
        }
    }

    /// Error kind name.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Config(_) => "ConfigError",
            Error::Connection(_) => "ConnectionError",
            Error::Scheme(_) => "SchemeError",
            Error::Setup(_) => "SetupError",
            Error::ManagerRuntime(_) => "ManagerRuntimeError",
            Error::RouterLaunch(_) => "RouterLaunchError",
        }
    }
}
