// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `errors` module defines the common error type shared by every codec crate.

use std::error::Error as StdError;
use std::fmt;
use std::ops::Deref;
use std::result;

/// `RasterError` enumerates every way a decode or encode call can fail. Each variant carries a
/// `&'static str` sub-kind discriminant so tests can assert on the specific failure without
/// stringly-typed matching on the `Display` output.
#[derive(Debug)]
pub enum RasterError {
    /// The stream does not contain a structurally valid instance of the format (bad signature,
    /// bad chunk order, corrupt marker length, ...).
    InvalidFormat(&'static str),
    /// The source ended before a structure (header, chunk, scan, frame) was fully read.
    Truncated(&'static str),
    /// The input is well-formed but describes a feature this codec does not implement
    /// (arithmetic-coded JPEG, compressed BMP, ...).
    Unsupported(&'static str),
    /// A checksum, CRC, or table consistency check failed.
    IntegrityFailure(&'static str),
    /// The external WebP codec reported a non-ok status.
    ExternalFailure(&'static str),
    /// A caller-supplied option or buffer was out of range.
    Argument(&'static str),
    /// An I/O error occurred while reading or writing the underlying stream.
    Io(std::io::Error),
}

impl fmt::Display for RasterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RasterError::InvalidFormat(msg) => write!(f, "invalid format: {}", msg),
            RasterError::Truncated(msg) => write!(f, "truncated stream: {}", msg),
            RasterError::Unsupported(msg) => write!(f, "unsupported feature: {}", msg),
            RasterError::IntegrityFailure(msg) => write!(f, "integrity failure: {}", msg),
            RasterError::ExternalFailure(msg) => write!(f, "external codec failure: {}", msg),
            RasterError::Argument(msg) => write!(f, "invalid argument: {}", msg),
            RasterError::Io(err) => write!(f, "io error: {}", err),
        }
    }
}

impl StdError for RasterError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            RasterError::Io(err) => Some(err.deref()),
            _ => None,
        }
    }
}

impl From<std::io::Error> for RasterError {
    fn from(err: std::io::Error) -> RasterError {
        match err.kind() {
            std::io::ErrorKind::UnexpectedEof => RasterError::Truncated("unexpected end of stream"),
            _ => RasterError::Io(err),
        }
    }
}

pub type Result<T> = result::Result<T, RasterError>;

/// Convenience function to create an invalid-format error.
pub fn invalid_format_error<T>(desc: &'static str) -> Result<T> {
    Err(RasterError::InvalidFormat(desc))
}

/// Convenience function to create a truncated-stream error.
pub fn truncated_error<T>(desc: &'static str) -> Result<T> {
    Err(RasterError::Truncated(desc))
}

/// Convenience function to create an unsupported-feature error.
pub fn unsupported_error<T>(desc: &'static str) -> Result<T> {
    Err(RasterError::Unsupported(desc))
}

/// Convenience function to create an integrity-failure error.
pub fn integrity_error<T>(desc: &'static str) -> Result<T> {
    Err(RasterError::IntegrityFailure(desc))
}

/// Convenience function to create an external-codec-failure error.
pub fn external_error<T>(desc: &'static str) -> Result<T> {
    Err(RasterError::ExternalFailure(desc))
}

/// Convenience function to create an invalid-argument error.
pub fn argument_error<T>(desc: &'static str) -> Result<T> {
    Err(RasterError::Argument(desc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_unexpected_eof_maps_to_truncated() {
        let io_err = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof");
        let err: RasterError = io_err.into();
        assert!(matches!(err, RasterError::Truncated(_)));
    }

    #[test]
    fn other_io_errors_are_preserved() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope");
        let err: RasterError = io_err.into();
        assert!(matches!(err, RasterError::Io(_)));
    }

    #[test]
    fn display_includes_sub_kind_message() {
        let err = RasterError::InvalidFormat("missing signature");
        assert_eq!(format!("{}", err), "invalid format: missing signature");
    }
}
