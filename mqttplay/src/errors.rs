use thiserror::Error;

#[derive(Debug, Error)]
pub enum FlowError {
    #[error("Cannot read flow file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Line {line}: invalid time \"{value}\"")]
    Time { line: usize, value: String },

    #[error("Delimiter must not be empty")]
    EmptyDelimiter,

    #[error("MQTT error: {0}")]
    Mqtt(#[from] rumqttc::ClientError),
}

pub type Result<T> = std::result::Result<T, FlowError>;
