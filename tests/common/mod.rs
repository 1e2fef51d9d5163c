/*
    SPDX-License-Identifier: Apache-2.0
    SPDX-FileCopyrightText: 2026 sha204 contributors
*/

//! Shared scaffolding: bring an emulated device through the full
//! personalization sequence so crypto tests start from a locked,
//! known-key part (slot N holds 0xNN repeated, OTP word N likewise).
#![allow(dead_code)]

use sha204::device::FLAG_NONE;
use sha204::zone::{Zone, CONFIG_NUM_WORDS, OTP_NUM_BLOCKS, SLOT_SIZE};
use sha204::{Crc16, DeviceVariant, EmulatedDevice, Sha204};

pub const SLOT_CONFIGS: &[(u8, [u8; 4])] = &[
    (0x05, [0x80, 0x80, 0x80, 0xa0]),
    (0x06, [0x80, 0x80, 0x80, 0xb0]),
    (0x07, [0x80, 0x80, 0x80, 0xa0]),
    (0x08, [0x80, 0x80, 0x80, 0xb0]),
    (0x09, [0x80, 0x48, 0xc0, 0x49]),
    (0x0a, [0x80, 0x80, 0x80, 0x80]),
    (0x0b, [0x00, 0x00, 0x00, 0x00]),
    (0x0c, [0x00, 0x80, 0x00, 0x80]),
];

pub fn slot_key(slot: u8) -> [u8; SLOT_SIZE] {
    [slot << 4 | slot; SLOT_SIZE]
}

pub fn otp_block(block: u8) -> [u8; 32] {
    let mut data = [0u8; 32];
    for word in 0..8u8 {
        let v = block * 8 + word;
        data[word as usize * 4..word as usize * 4 + 4].fill(v << 4 | v);
    }
    data
}

pub fn fresh() -> Sha204 {
    Sha204::new(DeviceVariant::AtSha204a, Box::new(EmulatedDevice::new()))
}

pub async fn personalized() -> Sha204 {
    let mut dev = fresh();
    dev.wake().await.unwrap();

    for &(addr, value) in SLOT_CONFIGS {
        dev.write(Zone::Config, addr, FLAG_NONE, &value).await.unwrap();
    }
    let mut crc = Crc16::new();
    for word in 0..CONFIG_NUM_WORDS {
        crc.update(&dev.read(Zone::Config, word).await.unwrap());
    }
    dev.lock_zone(Zone::Config, crc.value()).await.unwrap();

    dev.wake().await.unwrap();
    let mut crc = Crc16::new();
    for slot in 0u8..16 {
        let data = slot_key(slot);
        crc.update(&data);
        dev.write(Zone::Data, slot, FLAG_NONE, &data).await.unwrap();
    }
    for block in 0..OTP_NUM_BLOCKS {
        let data = otp_block(block);
        crc.update(&data);
        dev.write_otp_block(block, &data).await.unwrap();
    }
    dev.lock_zone(Zone::Data, crc.value()).await.unwrap();

    dev.wake().await.unwrap();
    dev
}
