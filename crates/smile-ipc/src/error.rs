use thiserror::Error;

#[derive(Debug, Error)]
pub enum IpcError {
    #[error("status channel unavailable after {attempts} attempts")]
    ChannelUnavailable { attempts: u32 },

    #[error("transport '{0}' is not compiled into this build")]
    TransportDisabled(&'static str),

    #[error("status channel already shut down")]
    Closed,

    #[error("status channel I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type IpcResult<T> = Result<T, IpcError>;
