/*
    SPDX-License-Identifier: Apache-2.0
    SPDX-FileCopyrightText: 2026 sha204 contributors
*/

//! CRC-16 variant used by the ATSHA204A.
//!
//! Polynomial 0x8005 with LSB-first data bits; this is not
//! CRC-16/CCITT and not the common reflected 0x8005 variants either,
//! so do not swap in a generic implementation without checking it
//! against the device.

/// Compute the device CRC over `buf`, seeded with `seed`.
///
/// A seed of 0 starts a fresh computation. Passing the running value
/// of a previous call chains the computation, so a long area can be
/// checksummed across multiple writes without buffering it:
/// `crc16(b, crc16(a, 0)) == crc16(ab, 0)`.
pub fn crc16(buf: &[u8], seed: u16) -> u16 {
    let mut crc = seed;
    for &byte in buf {
        for bit in 0..8 {
            let data_bit = (byte >> bit) & 1;
            let crc_bit = (crc >> 15) as u8;
            crc <<= 1;
            if data_bit != crc_bit {
                crc ^= 0x8005;
            }
        }
    }
    crc
}

/// Running CRC accumulator for multi-call programming sequences, e.g.
/// filling the Data and OTP zones across several writes and presenting
/// a single CRC to the final lock command.
#[derive(Debug, Clone, Copy, Default)]
pub struct Crc16(u16);

impl Crc16 {
    pub fn new() -> Self {
        Crc16(0)
    }

    pub fn update(&mut self, buf: &[u8]) {
        self.0 = crc16(buf, self.0);
    }

    pub fn value(&self) -> u16 {
        self.0
    }
}
