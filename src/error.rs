use thiserror::Error;

/// Setup-time failures. These are fatal: a session is never built from a
/// configuration that fails validation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("{name} must be {requirement} (got {value})")]
    InvalidParameter {
        name: &'static str,
        value: f64,
        requirement: &'static str,
    },

    #[error("{name} = {hz} Hz is at or above the Nyquist frequency of {nyquist} Hz")]
    AboveNyquist {
        name: &'static str,
        hz: f64,
        nyquist: f64,
    },

    #[error("peak band {start}..={end} does not fit in 0..={bins}")]
    PeakBand {
        start: usize,
        end: usize,
        bins: usize,
    },

    #[error("filter stage '{stage}' rejected its parameters: {detail}")]
    Filter {
        stage: &'static str,
        detail: String,
    },
}
