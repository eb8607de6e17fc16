#[derive(Debug, thiserror::Error)]
pub enum WorkloadGenerationError {
    #[error("failed to create scratch directory: {source}")]
    Scratch {
        #[source]
        source: std::io::Error,
    },
    #[error("encoder failed to start ({command}): {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("encoder returned non-zero exit ({command}) status={status:?}")]
    EncoderFailed {
        command: String,
        status: Option<i32>,
        stderr: String,
    },
    #[error("failed to read generated clip {path}: {source}")]
    ReadOutput {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("encoder produced an empty clip: {path}")]
    EmptyOutput { path: String },
}
