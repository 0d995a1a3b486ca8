/* This file is part of DarkFi (https://dark.fi)
 *
 * Copyright (C) 2020-2026 Dyne.org foundation
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as
 * published by the Free Software Foundation, either version 3 of the
 * License, or (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

// Hello developer. Please add your error to the according subsection
// that is commented, or make a new subsection. Keep it clean.

/// Main result type used throughout the codebase.
pub type Result<T> = std::result::Result<T, Error>;

/// General library errors used throughout the codebase.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    // ==============
    // Parsing errors
    // ==============
    #[error("Parse failed: {0}")]
    ParseFailed(&'static str),

    #[error(transparent)]
    ParseIntError(#[from] std::num::ParseIntError),

    #[error(transparent)]
    UrlParseError(#[from] url::ParseError),

    #[error("TOML decode failed: {0}")]
    TomlDeserializeError(String),

    #[error(transparent)]
    Utf8Error(#[from] std::string::FromUtf8Error),

    #[error(transparent)]
    StrUtf8Error(#[from] std::str::Utf8Error),

    #[error(transparent)]
    Base64DecodeError(#[from] base64::DecodeError),

    // ======================
    // Network-related errors
    // ======================
    #[error("Connection to {0} failed")]
    ConnectFailed(String),

    #[error("Timeout Error")]
    TimeoutError,

    #[error("TLS error: {0}")]
    TlsError(String),

    #[error("Malformed HTTP response: {0}")]
    MalformedHttpResponse(String),

    #[error("Unsupported URL scheme: {0}")]
    UnsupportedScheme(String),

    // ===================
    // State store errors
    // ===================
    #[error("Invalid state key: {0}")]
    InvalidStateKey(String),

    // ================================
    // Identity and key material errors
    // ================================
    #[error("Root privileges are required")]
    NotRoot,

    #[error("Unable to read hardware address of interface {0}")]
    MacUnreadable(String),

    #[error("Invalid hardware address: {0}")]
    InvalidMac(String),

    #[error("Invalid key material in slot {0}")]
    InvalidKey(String),

    // ===============================
    // Downloaded document errors
    // ===============================
    #[error("Document is missing its terminator line")]
    MissingTerminator,

    #[error("Document does not carry the expected key")]
    KeyMismatch,

    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    // ===================================
    // Platform and self-installation errors
    // ===================================
    #[error("Unsupported OS: {0}")]
    UnsupportedOs(String),

    #[error("Command `{0}` failed: {1}")]
    CommandFailed(String, String),

    #[error("Refusing to replace {0}: it is currently executing")]
    InstallRefused(String),

    // ====================
    // Miscellaneous errors
    // ====================
    #[error("IO error: {0}")]
    Io(std::io::ErrorKind),

    #[error("SetLogger (log crate) failed: {0}")]
    SetLoggerError(String),

    #[error("Invalid config file detected: {0}")]
    ConfigInvalid(String),

    #[error("{0} failed: {1}")]
    StepFailed(&'static str, Box<Error>),
}

impl Error {
    /// Returns `true` for environment defects that must terminate the
    /// process instead of being retried.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::NotRoot | Self::MacUnreadable(_) | Self::UnsupportedOs(_) => true,
            Self::StepFailed(_, inner) => inner.is_fatal(),
            _ => false,
        }
    }

    /// Wraps the error with the name of the step that produced it.
    pub fn in_step(self, step: &'static str) -> Self {
        Self::StepFailed(step, Box::new(self))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.kind())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::TomlDeserializeError(err.to_string())
    }
}

impl From<futures_rustls::rustls::Error> for Error {
    fn from(err: futures_rustls::rustls::Error) -> Self {
        Self::TlsError(err.to_string())
    }
}

impl From<log::SetLoggerError> for Error {
    fn from(err: log::SetLoggerError) -> Self {
        Self::SetLoggerError(err.to_string())
    }
}

impl From<crate::system::timeout::TimeoutError> for Error {
    fn from(_err: crate::system::timeout::TimeoutError) -> Self {
        Self::TimeoutError
    }
}
