use std::path::PathBuf;

use crate::{render::nft::FirewallTranslationError, wg::config::ParseError};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("parse error: {0}")]
    ParseError(#[from] ParseError),

    #[error("firewall error: {0}")]
    FirewallError(#[from] FirewallTranslationError),

    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("{}: {source}", path.display())]
    ReadConfig {
        path: PathBuf,
        source: std::io::Error,
    },
}
