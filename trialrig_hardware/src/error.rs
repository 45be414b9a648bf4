use thiserror::Error;

#[derive(Debug, Error)]
pub enum HwError {
    #[error("gpio error: {0}")]
    Gpio(String),
    #[error("hx711 data-ready timeout")]
    DataReadyTimeout,
    #[error("channel {0} is not attached")]
    ChannelUnavailable(u32),
    #[error("unsupported bridge gain {0} (hx711 supports 32, 64 or 128)")]
    UnsupportedGain(u32),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, HwError>;
