/// Errors raised while registering or updating metric families.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// The number of label values does not match the family's label keys.
    #[error("metric {metric}: expected {expected} label values, got {actual}")]
    LabelArity {
        metric: String,
        expected: usize,
        actual: usize,
    },

    /// A family was requested again under different label keys.
    #[error("metric {metric} is registered with labels {expected:?}, requested {actual:?}")]
    LabelKeys {
        metric: String,
        expected: Vec<String>,
        actual: Vec<String>,
    },

    /// Registration, lookup or encoding failed inside the Prometheus client.
    #[error("Prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),

    #[error("Exposition output is not valid UTF-8: {0}")]
    Encoding(#[from] std::string::FromUtf8Error),
}

pub type Result<T> = std::result::Result<T, RegistryError>;
