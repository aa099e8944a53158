use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("{subject} is not allowed to {action}")]
    Forbidden { subject: String, action: String },
    #[error("cluster rejected the client credentials")]
    Unauthorized,
    #[error("cluster api returned {status} for {endpoint}")]
    Status {
        endpoint: String,
        status: reqwest::StatusCode,
    },
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid cluster response: {0}")]
    InvalidResponse(String),
    #[error("failed to build cluster client: {0}")]
    Build(String),
    #[error("cluster call timed out after {0:?}")]
    Timeout(std::time::Duration),
}

impl ClientError {
    pub fn is_forbidden(&self) -> bool {
        matches!(self, ClientError::Forbidden { .. })
    }
}

pub type AuthzResult<T> = Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_variants() {
        let errors = vec![
            ClientError::Forbidden {
                subject: "alice".to_string(),
                action: "list pods".to_string(),
            },
            ClientError::Unauthorized,
            ClientError::Status {
                endpoint: "/api/v1/namespaces".to_string(),
                status: reqwest::StatusCode::BAD_GATEWAY,
            },
            ClientError::InvalidResponse("missing status".to_string()),
            ClientError::Build("bad url".to_string()),
            ClientError::Timeout(std::time::Duration::from_secs(1)),
        ];
        for error in errors {
            assert!(!error.to_string().is_empty());
        }
    }

    #[test]
    fn forbidden_names_subject_and_action() {
        let err = ClientError::Forbidden {
            subject: "alice".to_string(),
            action: "get namespace payments".to_string(),
        };
        assert!(err.is_forbidden());
        assert_eq!(
            err.to_string(),
            "alice is not allowed to get namespace payments"
        );
    }
}
