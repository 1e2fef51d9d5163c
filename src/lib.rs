/*
    SPDX-License-Identifier: Apache-2.0
    SPDX-FileCopyrightText: 2026 sha204 contributors
*/

//! Host-side driver for the ATSHA204A crypto-authentication secure
//! element, over any byte-oriented transport.
//!
//! The crate encodes commands, decodes and CRC-checks responses, and
//! models the device's lifecycle rules (zone locking, one-time writes,
//! TempKey sequencing) so callers can run MAC/HMAC/SHA/nonce/derive
//! operations without re-deriving the chip's protocol semantics.
//! Physical buses are out of scope: anything implementing
//! [`transport::Transport`] works, including the bundled
//! [`transport::EmulatedDevice`].

pub mod command;
pub mod crc;
pub mod device;
pub mod error;
pub mod transport;
pub mod zone;

pub use command::{Opcode, Status, WATCHDOG_TIME};
pub use crc::{crc16, Crc16};
pub use device::{
    CheckMacData, DeviceVariant, MacMode, NonceMode, RandomMode, Sha204, TempKeySource,
    TempKeyState,
};
pub use error::{Error, ErrorKind, Result};
pub use transport::{EmulatedDevice, Transport};
pub use zone::{LockState, OtpMode, SlotConfig, Zone};

pub use device::{
    FLAG_ENCRYPT, FLAG_NONE, FLAG_TEMPKEY_SOURCE_INPUT, FLAG_TEMPKEY_SOURCE_RANDOM,
    FLAG_USE_OTP_64_BITS, FLAG_USE_OTP_88_BITS, FLAG_USE_SN,
};
