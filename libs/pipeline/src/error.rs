use logpipe_api::PluginError;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("source unavailable ({location}): {error}")]
    SourceUnavailable { location: String, error: PluginError },

    #[error("broker ({broker}): {error}")]
    Broker { broker: String, error: PluginError },

    #[error("config: {0}")]
    Config(String),
}

impl PipelineError {
    /// Process exit status for a run that failed before streaming.
    pub fn exit_code(&self) -> i32 {
        match self {
            PipelineError::SourceUnavailable { .. } => 2,
            PipelineError::Broker { .. } | PipelineError::Config(_) => 1,
        }
    }
}
