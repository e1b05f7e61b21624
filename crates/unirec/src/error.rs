#[derive(PartialEq, Debug)]
pub enum AttributeError {
    /// The schema rejects attributes it does not declare
    /// (`ExtraProperties::Reject`).
    UnknownAttribute(String),
    /// A declared child was given a non-map value, or a declared collection a
    /// non-list value.
    InvalidChild(String),
}

impl std::fmt::Display for AttributeError {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            AttributeError::UnknownAttribute(name) => write!(fmt, "unknown attribute: {}", name),
            AttributeError::InvalidChild(name) => write!(fmt, "invalid value for child attribute: {}", name),
        }
    }
}

impl std::error::Error for AttributeError {}
