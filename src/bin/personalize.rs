/*
    SPDX-License-Identifier: Apache-2.0
    SPDX-FileCopyrightText: 2026 sha204 contributors
*/

//! Personalization demo: program and lock all three zones of a fresh
//! device with fixed, non-secret test key material.
//!
//! Each data slot is filled with its own index nibble repeated
//! (slot 0 = 00..00, slot 1 = 11..11, ...), the OTP words likewise.
//! DO NOT use this key material for anything real.
//!
//! Runs against the emulated device, so it is safe to execute
//! anywhere; point it at a hardware transport to personalize a real
//! (and irreversibly, permanently locked) part.

use log::{info, warn};
use sha204::device::FLAG_NONE;
use sha204::zone::{Zone, CONFIG_NUM_WORDS, OTP_NUM_BLOCKS, SLOT_SIZE};
use sha204::{Crc16, DeviceVariant, EmulatedDevice, LockState, Sha204};

/// Slot configuration words, two slots per config word. Mostly secret
/// keys with plain writes; slots 8/9 take encrypted writes keyed to
/// themselves, slots 12/13 are open scratch.
const SLOT_CONFIGS: &[(u8, [u8; 4])] = &[
    (0x05, [0x80, 0x80, 0x80, 0xa0]),
    (0x06, [0x80, 0x80, 0x80, 0xb0]),
    (0x07, [0x80, 0x80, 0x80, 0xa0]),
    (0x08, [0x80, 0x80, 0x80, 0xb0]),
    (0x09, [0x80, 0x48, 0xc0, 0x49]),
    (0x0a, [0x80, 0x80, 0x80, 0x80]),
    (0x0b, [0x00, 0x00, 0x00, 0x00]),
    (0x0c, [0x00, 0x80, 0x00, 0x80]),
];

async fn personalize(dev: &mut Sha204) -> sha204::Result<()> {
    dev.wake().await?;

    if dev.lock_config().await? == LockState::Locked {
        info!("Config zone already locked, skipping");
    } else {
        program_slot_configs(dev).await?;
        lock_config_zone(dev).await?;
    }

    dev.wake().await?;

    if dev.lock_data().await? == LockState::Locked {
        info!("Data/OTP zones already locked, skipping");
    } else {
        let mut crc = Crc16::new();
        program_data_slots(dev, &mut crc).await?;
        info!("Intermediate CRC: 0x{:04x}", crc.value());
        program_otp_zone(dev, &mut crc).await?;
        info!("Final CRC: 0x{:04x}", crc.value());
        dev.lock_zone(Zone::Data, crc.value()).await?;
    }

    Ok(())
}

async fn program_slot_configs(dev: &mut Sha204) -> sha204::Result<()> {
    for &(addr, value) in SLOT_CONFIGS {
        info!("Config word 0x{:02x}: {}", addr, hex::encode(value));
        dev.write(Zone::Config, addr, FLAG_NONE, &value).await?;
    }
    Ok(())
}

/// Read back the full Config zone, CRC it independently and present
/// that CRC to the lock command.
async fn lock_config_zone(dev: &mut Sha204) -> sha204::Result<()> {
    let mut crc = Crc16::new();
    for word in 0..CONFIG_NUM_WORDS {
        crc.update(&dev.read(Zone::Config, word).await?);
    }
    dev.lock_zone(Zone::Config, crc.value()).await
}

async fn program_data_slots(dev: &mut Sha204, crc: &mut Crc16) -> sha204::Result<()> {
    for slot in 0u8..16 {
        let data = [slot << 4 | slot; SLOT_SIZE];
        crc.update(&data);
        info!(
            "Slot {:2}: 0x{:02x}..0x{:02x} (running CRC 0x{:04x})",
            slot,
            data[0],
            data[31],
            crc.value()
        );
        dev.write(Zone::Data, slot, FLAG_NONE, &data).await?;
    }
    Ok(())
}

/// Before the Data/OTP lock only whole 32-byte blocks can be written
/// to OTP, so the zone is programmed as two blocks.
async fn program_otp_zone(dev: &mut Sha204, crc: &mut Crc16) -> sha204::Result<()> {
    for block in 0..OTP_NUM_BLOCKS {
        let mut data = [0u8; 32];
        for word in 0..8u8 {
            let v = block * 8 + word;
            data[word as usize * 4..word as usize * 4 + 4].fill(v << 4 | v);
        }
        crc.update(&data);
        info!(
            "OTP block {}: 0x{:02x}..0x{:02x} (running CRC 0x{:04x})",
            block,
            data[0],
            data[31],
            crc.value()
        );
        dev.write_otp_block(block, &data).await?;
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let mut dev = Sha204::new(DeviceVariant::AtSha204a, Box::new(EmulatedDevice::new()));

    match personalize(&mut dev).await {
        Ok(()) => {
            let sn = dev.serial_number().await.expect("serial number read");
            info!("Personalization complete, device SN {}", hex::encode(sn));
        }
        Err(e) => warn!("Personalization failed: {} ({:?})", e, e.kind()),
    }
}
