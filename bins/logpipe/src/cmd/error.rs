use logpipe_api::PluginError;

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("{0}")]
    Config(String),

    #[error("{0}")]
    Plugin(#[from] PluginError),

    #[error("{0}")]
    Pipeline(#[from] pipeline::PipelineError),
}

impl CliError {
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Pipeline(e) => e.exit_code(),
            CliError::Config(_) | CliError::Plugin(_) => 1,
        }
    }
}
