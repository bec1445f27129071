//! Error types and result alias for the crate.
//!
//! This module defines [`enum@crate::error::Error`] and the crate-wide [Result] alias. Variants cover
//! invalid configuration, graph compile failures, kernel dispatch problems and
//! malformed resources.
use thiserror::Error;

use crate::graph::NodeId;
use crate::resource::ResourceHandle;

pub type Result<T> = std::result::Result<T, Error>;

#[non_exhaustive]
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("graph compile error: {0}")]
    Compile(String),

    #[error("execution error: {0}")]
    Runtime(String),

    #[error("unknown node {0}")]
    UnknownNode(NodeId),

    #[error("unknown kernel '{name}'")]
    UnknownKernel { name: String },

    #[error("kernel '{kernel}' is missing binding '{binding}'")]
    MissingBinding { kernel: String, binding: String },

    #[error("malformed buffer {buffer}: {reason}")]
    MalformedBuffer {
        buffer: ResourceHandle,
        reason: String,
    },

    #[error("{0}")]
    Other(String),
}

impl From<String> for Error {
    fn from(value: String) -> Self {
        Error::Other(value)
    }
}

impl From<&str> for Error {
    fn from(value: &str) -> Self {
        Error::Other(value.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_string_uses_other_variant() {
        let err: Error = String::from("boom").into();
        assert!(matches!(err, Error::Other(_)));
    }

    #[test]
    fn missing_binding_names_kernel_and_binding() {
        let err = Error::MissingBinding {
            kernel: "fill".into(),
            binding: "dst".into(),
        };
        assert_eq!(err.to_string(), "kernel 'fill' is missing binding 'dst'");
    }
}
