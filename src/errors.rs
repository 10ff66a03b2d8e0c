use thiserror::Error;

/// Error kinds produced by the pipeline stages. None of these poison the
/// pipeline: a stage either recovers locally or produces nothing for the
/// current frame. `ConfigInvalid` is the exception and is fatal at startup.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("scan read timed out")]
    ScanTimeout,

    #[error("background learning populated only {covered} of {total} angles")]
    InsufficientBackground { covered: usize, total: usize },

    #[error("UDP send to {endpoint} failed: {source}")]
    UdpSendFailure {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("queue full, dropped oldest frame")]
    QueueOverflow,

    #[error("scanner error: {0}")]
    Scanner(String),
}
