//! Error taxonomy for stack declaration and deployment.
//!
//! Validation and reference errors are raised before any template is
//! produced. Provisioning failures come from the engine and carry its
//! output verbatim.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StackError {
    /// A required option is missing or malformed.
    #[error("validation error for {field}: {message}")]
    Validation {
        /// Config key that failed (e.g. "context.containerPort")
        field: String,
        message: String,
    },

    /// A network, secret or parameter locator is unusable.
    #[error("reference error for {field} ({locator:?}): {message}")]
    Reference {
        field: String,
        locator: String,
        message: String,
    },

    /// The provisioning engine rejected the deployment.
    #[error("provisioning failed for stack {stack}: {message}")]
    Provisioning { stack: String, message: String },
}

impl StackError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn reference(
        field: impl Into<String>,
        locator: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Reference {
            field: field.into(),
            locator: locator.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_field() {
        let err = StackError::validation("context.containerImage", "is required");
        assert_eq!(
            err.to_string(),
            "validation error for context.containerImage: is required"
        );

        let err = StackError::reference("dbSecretArn", "pg-creds", "must be an ARN");
        assert_eq!(
            err.to_string(),
            "reference error for dbSecretArn (\"pg-creds\"): must be an ARN"
        );
    }
}
