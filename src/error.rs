use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid tracker configuration: {0}")]
    InvalidConfig(&'static str),
}
