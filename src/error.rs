/*
    SPDX-License-Identifier: Apache-2.0
    SPDX-FileCopyrightText: 2026 sha204 contributors
*/
use crate::command::Status;

/// Coarse failure classes, per the protocol's error policy.
///
/// `Parameter` and `Communication` failures are surfaced before /
/// instead of a completed exchange and are never retried by the core.
/// `DeviceExec` and `Authentication` are terminal outcomes of a single
/// completed operation; they leave the session usable but invalidate
/// any standing assumption about TempKey contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Caller-supplied size or argument invalid, caught before any
    /// transport interaction.
    Parameter,
    /// Transport failure, timeout or response CRC mismatch; the
    /// integrity of the exchange itself is suspect.
    Communication,
    /// The device accepted the frame but refused or failed the
    /// operation (permission denied, zone already locked, lock CRC
    /// mismatch, ...).
    DeviceExec,
    /// CheckMAC comparison failed: a successful protocol exchange with
    /// a negative cryptographic result.
    Authentication,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid parameters: {0}")]
    BadParameters(&'static str),

    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no response within timeout")]
    Timeout,

    #[error("response CRC mismatch")]
    CrcMismatch,

    #[error("short or malformed response frame")]
    MalformedResponse,

    #[error("device did not acknowledge wake")]
    WakeFailed,

    #[error("device execution error")]
    Exec,

    #[error("device reported a padding error")]
    Padding,

    #[error("device rejected the command parameters")]
    DeviceBadParameters,

    #[error("CheckMAC comparison failed")]
    CheckMacFailed,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::BadParameters(_) => ErrorKind::Parameter,
            Error::Io(_)
            | Error::Timeout
            | Error::CrcMismatch
            | Error::MalformedResponse
            | Error::WakeFailed => ErrorKind::Communication,
            Error::Exec | Error::Padding | Error::DeviceBadParameters => ErrorKind::DeviceExec,
            Error::CheckMacFailed => ErrorKind::Authentication,
        }
    }

    /// Translate a device status byte into an outcome. This is the only
    /// place raw status bytes cross into the error taxonomy.
    ///
    /// `Ready` is the wake acknowledgement and nothing else; a command
    /// answered with it is a malformed exchange, not a success.
    pub(crate) fn from_status(status: Status) -> Result<()> {
        match status {
            Status::Ok => Ok(()),
            Status::Ready => Err(Error::MalformedResponse),
            Status::CheckMacFail => Err(Error::CheckMacFailed),
            Status::ExecError => Err(Error::Exec),
            Status::PaddingError => Err(Error::Padding),
            Status::BadParameters => Err(Error::DeviceBadParameters),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
