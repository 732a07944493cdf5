use thiserror::Error;

#[derive(Error, Debug)]
pub enum IpsError {
    #[error("Precondition failed: {requirement}")]
    Precondition {
        requirement: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid Patch: {0}")]
    InvalidPatch(&'static str),

    #[error(
        "Truncated Patch: expecting record '{field}' field, got {got} of {expected} bytes \
         before reaching end of file"
    )]
    Truncated {
        field: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("Bad IO: {0}")]
    Io(#[from] std::io::Error),
}
