use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Cannot read configuration file {path}: {source}")]
    ConfigFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed configuration file {path}: {source}")]
    ConfigParse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Missing key \"{key}\" in message \"{message}\"")]
    MissingKey { message: String, key: String },

    #[error("Topic \"{0}\" is defined several times")]
    DuplicateTopic(String),

    #[error("Unknown function \"{name}\" in message \"{message}\"")]
    UnknownFunction { message: String, name: String },

    #[error("Malformed parameter \"{field}\" for function {function}: {reason}")]
    MalformedParameter {
        function: &'static str,
        field: String,
        reason: String,
    },

    #[error("Invalid parameters in message \"{message}\": {source}")]
    InvalidInvocation {
        message: String,
        #[source]
        source: Box<Error>,
    },

    #[error("Key \"param\" or element \"param[{field}]\" not found in message \"{message}\"")]
    MissingSetTarget { message: String, field: String },

    #[error("Cannot decode command payload on {topic}: {source}")]
    CommandPayload {
        topic: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("MQTT error: {0}")]
    Mqtt(#[from] rumqttc::ClientError),

    #[error("MQTT connection error: {0}")]
    Connection(#[from] rumqttc::ConnectionError),

    #[error("Timed out connecting to MQTT broker {0}")]
    ConnectTimeout(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn malformed(
        function: &'static str,
        field: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Error::MalformedParameter {
            function,
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Configuration and connection errors abort startup. The others only
    /// drop the command or message that caused them.
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::ConfigFile { .. }
            | Error::ConfigParse { .. }
            | Error::Config(_)
            | Error::MissingKey { .. }
            | Error::DuplicateTopic(_)
            | Error::UnknownFunction { .. }
            | Error::InvalidInvocation { .. }
            | Error::MissingSetTarget { .. }
            | Error::Connection(_)
            | Error::ConnectTimeout(_) => true,

            // Reachable at runtime through a SET that corrupted a bag
            Error::MalformedParameter { .. } => false,
            Error::CommandPayload { .. } => false,
            Error::Mqtt(_) => false,
            Error::Json(_) => false,
            Error::Io(_) => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
