use std::string::FromUtf8Error;

use chaos_core::services::BackendError;

#[derive(Debug, thiserror::Error)]
pub enum AwsError {
    #[error("aws command failed to start ({command}): {source}")]
    Io {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("aws command returned non-zero exit ({command}) status={status:?}: {stderr}")]
    CommandFailed {
        command: String,
        status: Option<i32>,
        stderr: String,
    },
    #[error("aws command output was not valid UTF-8 ({command}, {stream}): {source}")]
    NonUtf8Output {
        command: String,
        stream: &'static str,
        #[source]
        source: FromUtf8Error,
    },
    #[error("aws command output was not the expected JSON ({command}): {source}")]
    Json {
        command: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to stage request body: {source}")]
    Staging {
        #[source]
        source: std::io::Error,
    },
}

impl AwsError {
    pub fn into_backend(self, service: &'static str, operation: &str) -> BackendError {
        match self {
            AwsError::Json { .. } => BackendError::parse(service, operation, self.to_string()),
            other => BackendError::request(service, operation, other.to_string()),
        }
    }

    /// True when the service answered "no such object" rather than failing.
    pub fn is_not_found(&self) -> bool {
        match self {
            AwsError::CommandFailed { stderr, .. } => {
                stderr.contains("404")
                    || stderr.contains("Not Found")
                    || stderr.contains("NoSuchKey")
            }
            _ => false,
        }
    }
}
