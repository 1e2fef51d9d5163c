/*
    SPDX-License-Identifier: Apache-2.0
    SPDX-FileCopyrightText: 2026 sha204 contributors
*/

//! Static description of the device's three memory zones, their
//! addressing and the per-slot configuration words.
//!
//! Write legality depends on lock state and is enforced by the device:
//!
//! | Zone   | Config unlocked | Config locked, own zone unlocked | Own zone locked            |
//! |--------|-----------------|----------------------------------|----------------------------|
//! | Config | write words     | read only                        | read only                  |
//! | OTP    | no access       | write 32-byte blocks             | consumption-mode bits only |
//! | Data   | no access       | write slots freely               | per-slot permissions       |
//!
//! The model rejects out-of-range ids and wrong sizes host-side;
//! permission violations are the device's call and come back as
//! execution errors.

use crate::error::{Error, Result};

pub const ZONE_CONFIG_SIZE: usize = 88;
pub const ZONE_OTP_SIZE: usize = 64;
pub const ZONE_DATA_SIZE: usize = 512;

pub const CONFIG_NUM_WORDS: u8 = 22;
pub const OTP_NUM_WORDS: u8 = 16;
pub const OTP_NUM_BLOCKS: u8 = 2;
pub const DATA_NUM_SLOTS: u8 = 16;

pub const WORD_SIZE: usize = 4;
pub const SLOT_SIZE: usize = 32;
pub const BLOCK_SIZE: usize = 32;

/// Config zone word addresses of the fixed fields.
pub const SERIALNBR_ADDR0_3: u16 = 0x00;
pub const SERIALNBR_ADDR4_7: u16 = 0x02;
pub const SERIALNBR_ADDR8: u16 = 0x03;
pub const OTP_MODE_ADDR: u16 = 0x04;
pub const OTP_MODE_OFFSET: usize = 2;
pub const LOCK_ADDR: u16 = 0x15;
pub const LOCK_DATA_OFFSET: usize = 2;
pub const LOCK_CONFIG_OFFSET: usize = 3;

/// Memory zones; the discriminants are the wire encoding (param1).
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Zone {
    Config = 0,
    Otp = 1,
    Data = 2,
}

impl Zone {
    pub fn size(self) -> usize {
        match self {
            Zone::Config => ZONE_CONFIG_SIZE,
            Zone::Otp => ZONE_OTP_SIZE,
            Zone::Data => ZONE_DATA_SIZE,
        }
    }

    /// Bytes moved by a single read/write on this zone.
    pub fn access_size(self) -> usize {
        match self {
            Zone::Config | Zone::Otp => WORD_SIZE,
            Zone::Data => SLOT_SIZE,
        }
    }

    /// Number of addressable units (words or slots).
    pub fn unit_count(self) -> u8 {
        match self {
            Zone::Config => CONFIG_NUM_WORDS,
            Zone::Otp => OTP_NUM_WORDS,
            Zone::Data => DATA_NUM_SLOTS,
        }
    }

    /// Wire address of unit `id`, or a parameter error if out of range.
    pub fn unit_addr(self, id: u8) -> Result<u16> {
        if id >= self.unit_count() {
            return Err(Error::BadParameters("zone id out of range"));
        }
        Ok(match self {
            Zone::Config => id as u16,
            // Word addressing as used by the original tooling: words at
            // 4*i, the two pre-lock blocks at 0x00 and 0x10.
            Zone::Otp => 4 * id as u16,
            Zone::Data => 8 * id as u16,
        })
    }
}

/// OTP block address for the 32-byte block writes that are the only
/// legal OTP writes before the Data/OTP lock.
pub fn otp_block_addr(block: u8) -> Result<u16> {
    if block >= OTP_NUM_BLOCKS {
        return Err(Error::BadParameters("otp block out of range"));
    }
    Ok(16 * block as u16)
}

/// Config word holding the configuration of `slot` (two slots per word).
pub fn slot_config_addr(slot: u8) -> Result<u16> {
    if slot >= DATA_NUM_SLOTS {
        return Err(Error::BadParameters("slot out of range"));
    }
    Ok(0x05 + (slot / 2) as u16)
}

/// Byte offset of `slot`'s half inside its config word.
pub fn slot_config_offset(slot: u8) -> usize {
    if slot % 2 == 0 { 0 } else { 2 }
}

/// Per-zone lock state. The transition Unlocked -> Locked is one-way
/// for the life of the physical device; no unlock exists, here or on
/// the chip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    Unlocked,
    Locked,
}

impl LockState {
    pub fn from_byte(byte: u8) -> Option<LockState> {
        match byte {
            0x55 => Some(LockState::Unlocked),
            0x00 => Some(LockState::Locked),
            _ => None,
        }
    }
}

/// OTP zone operating mode, config byte 18.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtpMode {
    Legacy,
    Consumption,
    ReadOnly,
}

impl OtpMode {
    pub fn from_byte(byte: u8) -> Option<OtpMode> {
        match byte {
            0x00 => Some(OtpMode::Legacy),
            0x55 => Some(OtpMode::Consumption),
            0xaa => Some(OtpMode::ReadOnly),
            _ => None,
        }
    }
}

/// One slot's 2-byte configuration word. Written only while the Config
/// zone is unlocked; the device enforces it thereafter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SlotConfig {
    pub read_key: u8,
    pub check_only: bool,
    pub single_use: bool,
    pub encrypt_read: bool,
    pub is_secret: bool,
    pub write_key: u8,
    pub write_config: u8,
}

impl SlotConfig {
    pub fn pack(&self) -> [u8; 2] {
        let mut word = (self.read_key & 0x0f) as u16;
        if self.check_only {
            word |= 1 << 4;
        }
        if self.single_use {
            word |= 1 << 5;
        }
        if self.encrypt_read {
            word |= 1 << 6;
        }
        if self.is_secret {
            word |= 1 << 7;
        }
        word |= ((self.write_key & 0x0f) as u16) << 8;
        word |= ((self.write_config & 0x0f) as u16) << 12;
        word.to_le_bytes()
    }

    pub fn unpack(bytes: [u8; 2]) -> SlotConfig {
        let word = u16::from_le_bytes(bytes);
        SlotConfig {
            read_key: (word & 0x0f) as u8,
            check_only: word & (1 << 4) != 0,
            single_use: word & (1 << 5) != 0,
            encrypt_read: word & (1 << 6) != 0,
            is_secret: word & (1 << 7) != 0,
            write_key: ((word >> 8) & 0x0f) as u8,
            write_config: ((word >> 12) & 0x0f) as u8,
        }
    }
}
