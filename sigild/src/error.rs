// SPDX-License-Identifier: MIT OR Apache-2.0

use snafu::Snafu;

pub(crate) type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub(crate) enum Error {
    #[snafu(display("failed to initialize logger: {source}"))]
    Logger { source: log::SetLoggerError },

    #[snafu(display("{source}"))]
    Pipeline { source: sigil::Error },

    #[snafu(display("failed to read {path}: {source}"))]
    FileRead {
        path: String,
        source: std::io::Error,
    },

    #[snafu(display("failed to parse {path}: {source}"))]
    AlertConfigParse {
        path: String,
        source: serde_yaml::Error,
    },

    #[snafu(display("failed to send alert to {url}"))]
    AlertSend { url: String },

    #[snafu(display("failed to bind {addr}: {source}"))]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    #[snafu(display("server error: {source}"))]
    Serve { source: std::io::Error },
}

impl From<sigil::Error> for Error {
    fn from(source: sigil::Error) -> Self {
        Error::Pipeline { source }
    }
}
