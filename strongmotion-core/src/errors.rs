/// Basic Error types.
///
/// Failures that are local to a single trace or stream are not errors: they
/// are recorded on the container itself (see `StationTrace::fail`) and
/// processing continues. The variants here are reserved for conditions that
/// must be surfaced to the caller.
#[derive(Debug)]
pub enum SmError {
    /// IoError from the std library.
    StdIoError(std::io::Error),
    /// An unreadable or internally inconsistent raw file.
    MalformedInput { path: String, msg: String },
    /// Data carries units outside the recognized set.
    UnitsError { msg: String },
    /// A container invariant was violated on construction or mutation.
    Validation { msg: String },
    /// A processing step refused to run because its inputs are unusable.
    StepFailure { step: String, reason: String },
    /// An internal error inside a processing step.
    StepInternal { step: String, msg: String },
    /// A required trace or stream parameter has not been computed yet.
    MissingParameter { key: String },
    /// HDF5 workspace read/write failure.
    WorkspaceIo { msg: String },
    /// Unknown step name, missing argument or invalid enum value in the
    /// layered configuration.
    Config { msg: String },
    /// Enum creation error.
    ParseEnum { f: String, code: String },
    /// Serialisation/Deserialisation error.
    SerdeError(serde_json::Error),
    /// Error in a YAML configuration layer.
    YamlError(serde_yaml::Error),
    /// XML reading or writing error.
    XmlError { msg: String },
}

impl From<std::io::Error> for SmError {
    fn from(e: std::io::Error) -> Self {
        Self::StdIoError(e)
    }
}

impl From<serde_json::Error> for SmError {
    fn from(e: serde_json::Error) -> Self {
        Self::SerdeError(e)
    }
}

impl From<serde_yaml::Error> for SmError {
    fn from(e: serde_yaml::Error) -> Self {
        Self::YamlError(e)
    }
}

impl From<quick_xml::Error> for SmError {
    fn from(e: quick_xml::Error) -> Self {
        Self::XmlError { msg: e.to_string() }
    }
}

impl std::fmt::Display for SmError {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use self::SmError::*;
        match self {
            StdIoError(x) => write!(fmt, "{}", x),
            MalformedInput { path, msg } => write!(fmt, "Could not read {}: {}", path, msg),
            UnitsError { msg } => write!(fmt, "Unrecognized units: {}", msg),
            Validation { msg } => write!(fmt, "Invariant violated: {}", msg),
            StepFailure { step, reason } => write!(fmt, "Step {} failed: {}", step, reason),
            StepInternal { step, msg } => write!(fmt, "internal:{}:{}", step, msg),
            MissingParameter { key } => write!(fmt, "Parameter {} has not been set.", key),
            WorkspaceIo { msg } => write!(fmt, "Workspace I/O error: {}", msg),
            Config { msg } => write!(fmt, "Configuration error: {}", msg),
            ParseEnum { f, code } => write!(fmt, "Could not parse source ({}) to {}.", code, f),
            SerdeError(x) => write!(fmt, "{}", x),
            YamlError(x) => write!(fmt, "{}", x),
            XmlError { msg } => write!(fmt, "XML error: {}", msg),
        }
    }
}

impl From<SmError> for String {
    fn from(e: SmError) -> String {
        e.to_string()
    }
}

impl std::error::Error for SmError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        use self::SmError::*;
        match self {
            StdIoError(x) => x.source(),
            SerdeError(x) => x.source(),
            YamlError(x) => x.source(),
            _ => None,
        }
    }
}
