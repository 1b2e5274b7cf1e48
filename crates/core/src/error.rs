use thiserror::Error;

#[derive(Error, Debug)]
pub enum DpipError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("unknown filter: {0}")]
    UnknownFilter(String),

    #[error("unknown image kind: {0}")]
    UnknownImageKind(String),

    #[error("{0}")]
    Other(String),
}
