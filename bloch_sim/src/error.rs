use thiserror::Error;

pub type Result<T> = std::result::Result<T, BlochError>;

#[derive(Debug, Error)]
pub enum BlochError {
    #[error("{compartments} compartments need {expected} exchange blocks, got {found}")]
    ExchangeBlockCount{compartments:usize, expected:usize, found:usize},

    #[error("exchange table for {compartments} compartments has {rows} rows (row {row} has {len} entries)")]
    ExchangeTableShape{compartments:usize, rows:usize, row:usize, len:usize},

    #[error("compartment count mismatch: expected {expected}, found {found}")]
    CompartmentMismatch{expected:usize, found:usize},

    #[error("invalid {name}: {value}")]
    InvalidParameter{name:&'static str, value:f64},

    #[error("gradient profile has {gradients} samples but the rf waveform has {samples}")]
    WaveformLength{samples:usize, gradients:usize},

    #[error("steady state is undefined: (I - A) is singular")]
    Singular,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("toml serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl BlochError {
    pub(crate) fn invalid(name:&'static str, value:f64) -> BlochError {
        BlochError::InvalidParameter{name, value}
    }
}

/// Fails with `CompartmentMismatch` unless `found == expected`.
pub(crate) fn check_compartments(expected:usize, found:usize) -> Result<()> {
    match expected == found {
        true => Ok(()),
        false => Err(BlochError::CompartmentMismatch{expected, found})
    }
}
