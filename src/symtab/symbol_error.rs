use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SymbolError {
    #[error("{0} declared twice")]
    Duplicate(String),

    #[error("{0} not declared")]
    Undeclared(String),

    #[error("{field} is not a field of {class}")]
    UnknownField { field: String, class: String },
}
