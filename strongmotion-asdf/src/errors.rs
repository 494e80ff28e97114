use strongmotion_core::errors::SmError;

/// Errors of the workspace container.
#[derive(Debug)]
pub enum WorkspaceError {
    /// An error from the core containers or their serialization.
    Core(SmError),
    /// An HDF5-level failure.
    Hdf5 { msg: String },
    /// A `(station, event, label)` record already exists and `overwrite`
    /// was not requested.
    DuplicateRecord {
        station: String,
        event_id: String,
        label: String,
    },
    /// A requested record does not exist.
    NotFound { what: String },
    /// Labels participate in dataset names; the reserved delimiter is
    /// refused.
    BadLabel { label: String },
}

impl From<SmError> for WorkspaceError {
    fn from(e: SmError) -> Self {
        Self::Core(e)
    }
}

impl From<hdf5::Error> for WorkspaceError {
    fn from(e: hdf5::Error) -> Self {
        Self::Hdf5 { msg: e.to_string() }
    }
}

impl std::fmt::Display for WorkspaceError {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use self::WorkspaceError::*;
        match self {
            Core(e) => write!(fmt, "{}", e),
            Hdf5 { msg } => write!(fmt, "HDF5 error: {}", msg),
            DuplicateRecord {
                station,
                event_id,
                label,
            } => write!(
                fmt,
                "A record for ({}, {}, {}) already exists; pass overwrite to replace it",
                station, event_id, label
            ),
            NotFound { what } => write!(fmt, "{} not found in the workspace", what),
            BadLabel { label } => {
                write!(fmt, "Label {:?} must not contain the '_' delimiter", label)
            }
        }
    }
}

impl From<WorkspaceError> for String {
    fn from(e: WorkspaceError) -> String {
        e.to_string()
    }
}

impl std::error::Error for WorkspaceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            WorkspaceError::Core(e) => Some(e),
            _ => None,
        }
    }
}
