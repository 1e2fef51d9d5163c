/*
    SPDX-License-Identifier: Apache-2.0
    SPDX-FileCopyrightText: 2026 sha204 contributors
*/

//! Software ATSHA204A behind the [`Transport`] contract.
//!
//! Implements the device's command set, zone permission rules and
//! SHA-256 message compositions faithfully enough to develop and test
//! host code without hardware: zones with factory defaults, one-time
//! locking with CRC verification, TempKey validity tracking and the
//! characteristic `ff ff 00 00` RNG output of an unconfigured device.

use crate::command::{parse_frame, Opcode, Status};
use crate::crc::crc16;
use crate::transport::Transport;
use crate::zone::SlotConfig;
use hmac::{Hmac, Mac};
use log::{debug, trace, warn};
use sha2::digest::generic_array::GenericArray;
use sha2::{Digest, Sha256};
use std::io;
use std::time::Duration;

type HmacSha256 = Hmac<Sha256>;

const SHA256_IV: [u32; 8] = [
    0x6a09e667, 0xbb67ae85, 0x3c6ef372, 0xa54ff53a, 0x510e527f, 0x9b05688c, 0x1f83d9ab,
    0x5be0cd19,
];

/// Config zone byte offsets of the fixed fields.
const CFG_OTP_MODE: usize = 18;
const CFG_SLOT_CONFIG: usize = 20;
const CFG_LOCK_DATA: usize = 86;
const CFG_LOCK_CONFIG: usize = 87;

const LOCKED: u8 = 0x00;
const UNLOCKED: u8 = 0x55;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TempKeySrc {
    Random,
    Input,
}

#[derive(Debug)]
pub struct EmulatedDevice {
    config: [u8; 88],
    otp: [u8; 64],
    data: [u8; 512],

    tempkey: [u8; 32],
    tempkey_valid: bool,
    tempkey_source: TempKeySrc,

    /// Running SHA engine state between Init and Compute calls.
    sha_state: Option<[u32; 8]>,

    rng_counter: u64,
    awake: bool,
    response: Option<Vec<u8>>,
}

impl Default for EmulatedDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl EmulatedDevice {
    pub fn new() -> Self {
        let mut config = [0u8; 88];
        // SN[0:3], fixed prefix 01 23 as on production parts.
        config[0..4].copy_from_slice(&[0x01, 0x23, 0x9f, 0x4c]);
        // Device revision.
        config[4..8].copy_from_slice(&[0x00, 0x02, 0x00, 0x09]);
        // SN[4:8], trailing 0xee as on production parts.
        config[8..13].copy_from_slice(&[0xaa, 0x55, 0x83, 0x71, 0xee]);
        // I2C address.
        config[16] = 0xc8;
        // OTP mode: consumption.
        config[CFG_OTP_MODE] = 0x55;
        // UseFlag / UpdateCount pairs and LastKeyUse.
        for i in (52..68).step_by(2) {
            config[i] = 0xff;
        }
        for b in &mut config[68..84] {
            *b = 0xff;
        }
        config[CFG_LOCK_DATA] = UNLOCKED;
        config[CFG_LOCK_CONFIG] = UNLOCKED;

        EmulatedDevice {
            config,
            otp: [0u8; 64],
            data: [0u8; 512],
            tempkey: [0u8; 32],
            tempkey_valid: false,
            tempkey_source: TempKeySrc::Random,
            sha_state: None,
            rng_counter: 0,
            awake: false,
            response: None,
        }
    }

    /// Raw zone contents, for assertions in tests and demos.
    pub fn zone_bytes(&self, zone: crate::zone::Zone) -> &[u8] {
        match zone {
            crate::zone::Zone::Config => &self.config,
            crate::zone::Zone::Otp => &self.otp,
            crate::zone::Zone::Data => &self.data,
        }
    }

    fn sn(&self) -> [u8; 9] {
        let mut sn = [0u8; 9];
        sn[0..4].copy_from_slice(&self.config[0..4]);
        sn[4..9].copy_from_slice(&self.config[8..13]);
        sn
    }

    fn config_locked(&self) -> bool {
        self.config[CFG_LOCK_CONFIG] == LOCKED
    }

    fn data_locked(&self) -> bool {
        self.config[CFG_LOCK_DATA] == LOCKED
    }

    fn slot_config(&self, slot: usize) -> SlotConfig {
        let off = CFG_SLOT_CONFIG + slot * 2;
        SlotConfig::unpack([self.config[off], self.config[off + 1]])
    }

    fn slot_key(&self, slot: usize) -> [u8; 32] {
        let mut key = [0u8; 32];
        key.copy_from_slice(&self.data[slot * 32..slot * 32 + 32]);
        key
    }

    fn rng(&mut self) -> [u8; 32] {
        // Parts with an unlocked Config zone always emit this pattern.
        if !self.config_locked() {
            let mut out = [0u8; 32];
            for chunk in out.chunks_mut(4) {
                chunk.copy_from_slice(&[0xff, 0xff, 0x00, 0x00]);
            }
            return out;
        }
        self.rng_counter += 1;
        let mut h = Sha256::new();
        h.update(b"emulated rng seed");
        h.update(self.rng_counter.to_le_bytes());
        h.finalize().into()
    }

    fn status(&mut self, status: Status) {
        let mut frame = vec![0x04, status as u8];
        let crc = crc16(&frame, 0);
        frame.extend_from_slice(&crc.to_le_bytes());
        self.response = Some(frame);
    }

    fn reply(&mut self, payload: &[u8]) {
        let mut frame = Vec::with_capacity(payload.len() + 3);
        frame.push((payload.len() + 3) as u8);
        frame.extend_from_slice(payload);
        let crc = crc16(&frame, 0);
        frame.extend_from_slice(&crc.to_le_bytes());
        self.response = Some(frame);
    }

    fn dispatch(&mut self, opcode: u8, param1: u8, param2: u16, data: &[u8]) {
        match opcode {
            x if x == Opcode::Pause as u8 => self.status(Status::Ok),
            x if x == Opcode::DevRev as u8 => {
                let rev: [u8; 4] = self.config[4..8].try_into().unwrap();
                self.reply(&rev);
            }
            x if x == Opcode::Random as u8 => {
                let out = self.rng();
                self.reply(&out);
            }
            x if x == Opcode::Read as u8 => self.cmd_read(param1, param2),
            x if x == Opcode::Write as u8 => self.cmd_write(param1, param2, data),
            x if x == Opcode::Lock as u8 => self.cmd_lock(param1, param2),
            x if x == Opcode::Nonce as u8 => self.cmd_nonce(param1, data),
            x if x == Opcode::GenDig as u8 => self.cmd_gen_dig(param1, param2, data),
            x if x == Opcode::DeriveKey as u8 => self.cmd_derive_key(param1, param2),
            x if x == Opcode::Mac as u8 => self.cmd_mac(param1, param2, data),
            x if x == Opcode::CheckMac as u8 => self.cmd_check_mac(param1, param2, data),
            x if x == Opcode::Hmac as u8 => self.cmd_hmac(param1, param2),
            x if x == Opcode::Sha as u8 => self.cmd_sha(param1, data),
            _ => {
                warn!("emulator: unknown opcode 0x{:02x}", opcode);
                self.status(Status::BadParameters);
            }
        }
    }

    fn cmd_read(&mut self, param1: u8, addr: u16) {
        let zone = param1 & 0x03;
        let long = param1 & 0x80 != 0;
        match (zone, long) {
            // Config: 4-byte words, always readable.
            (0, false) => {
                let off = addr as usize * 4;
                if off + 4 > 88 {
                    self.status(Status::ExecError);
                    return;
                }
                let word = self.config[off..off + 4].to_vec();
                self.reply(&word);
            }
            // OTP: 4-byte words at 4*i, readable once Data/OTP locked.
            (1, false) => {
                let off = addr as usize;
                if !self.data_locked() || off % 4 != 0 || off + 4 > 64 {
                    self.status(Status::ExecError);
                    return;
                }
                // Legacy mode hides words 0 and 1.
                if self.config[CFG_OTP_MODE] == 0x00 && off < 8 {
                    self.status(Status::ExecError);
                    return;
                }
                let word = self.otp[off..off + 4].to_vec();
                self.reply(&word);
            }
            // Data: 32-byte slots, readable per slot config after lock.
            (2, true) => {
                let slot = (addr / 8) as usize;
                if !self.data_locked() || addr % 8 != 0 || slot >= 16 {
                    self.status(Status::ExecError);
                    return;
                }
                let cfg = self.slot_config(slot);
                if cfg.is_secret && !cfg.encrypt_read {
                    self.status(Status::ExecError);
                    return;
                }
                let mut out = self.slot_key(slot);
                if cfg.encrypt_read {
                    if !self.tempkey_valid {
                        self.status(Status::ExecError);
                        return;
                    }
                    for (b, k) in out.iter_mut().zip(self.tempkey.iter()) {
                        *b ^= k;
                    }
                    self.tempkey_valid = false;
                }
                self.reply(&out);
            }
            _ => self.status(Status::BadParameters),
        }
    }

    fn cmd_write(&mut self, param1: u8, addr: u16, data: &[u8]) {
        let zone = param1 & 0x03;
        let long = param1 & 0x80 != 0;
        let encrypted = param1 & 0x40 != 0;
        if (long && data.len() != 32) || (!long && data.len() != 4) {
            return self.status(Status::BadParameters);
        }

        match zone {
            0 => {
                // Config words; SN/revision and the lock word are not
                // writable even before lock.
                let word = addr as usize;
                if self.config_locked() || word < 4 || word >= 22 || word == 0x15 || long {
                    return self.status(Status::ExecError);
                }
                self.config[word * 4..word * 4 + 4].copy_from_slice(data);
                self.status(Status::Ok);
            }
            1 => {
                if !self.config_locked() {
                    return self.status(Status::ExecError);
                }
                if !self.data_locked() {
                    // Pre-lock: whole blocks only, addresses 0x00/0x10.
                    if !long || (addr != 0x00 && addr != 0x10) {
                        return self.status(Status::ExecError);
                    }
                    let off = addr as usize * 2;
                    self.otp[off..off + 32].copy_from_slice(data);
                    return self.status(Status::Ok);
                }
                // Post-lock: consumption mode allows setting bits only.
                if long || self.config[CFG_OTP_MODE] != 0x55 {
                    return self.status(Status::ExecError);
                }
                let off = addr as usize;
                if off % 4 != 0 || off + 4 > 64 {
                    return self.status(Status::ExecError);
                }
                let current = &self.otp[off..off + 4];
                if current.iter().zip(data).any(|(old, new)| old & !new != 0) {
                    return self.status(Status::ExecError);
                }
                self.otp[off..off + 4].copy_from_slice(data);
                self.status(Status::Ok);
            }
            2 => {
                let slot = (addr / 8) as usize;
                if !self.config_locked() || !long || addr % 8 != 0 || slot >= 16 {
                    return self.status(Status::ExecError);
                }
                let mut incoming: [u8; 32] = data.try_into().unwrap();
                if self.data_locked() {
                    let cfg = self.slot_config(slot);
                    if cfg.write_config & 0x08 != 0 {
                        return self.status(Status::ExecError);
                    }
                    if cfg.write_config & 0x04 != 0 {
                        // Slot requires encrypted writes.
                        if !encrypted || !self.tempkey_valid {
                            return self.status(Status::ExecError);
                        }
                        for (b, k) in incoming.iter_mut().zip(self.tempkey.iter()) {
                            *b ^= k;
                        }
                        self.tempkey_valid = false;
                    }
                }
                self.data[slot * 32..slot * 32 + 32].copy_from_slice(&incoming);
                self.status(Status::Ok);
            }
            _ => self.status(Status::BadParameters),
        }
    }

    fn cmd_lock(&mut self, param1: u8, crc: u16) {
        let skip_crc = param1 & 0x80 != 0;
        match param1 & 0x03 {
            0x00 => {
                if self.config_locked() {
                    return self.status(Status::ExecError);
                }
                if !skip_crc && crc16(&self.config, 0) != crc {
                    debug!("emulator: config lock CRC mismatch");
                    return self.status(Status::ExecError);
                }
                self.config[CFG_LOCK_CONFIG] = LOCKED;
                self.status(Status::Ok);
            }
            0x01 => {
                if !self.config_locked() || self.data_locked() {
                    return self.status(Status::ExecError);
                }
                if !skip_crc && crc16(&self.otp, crc16(&self.data, 0)) != crc {
                    debug!("emulator: data/otp lock CRC mismatch");
                    return self.status(Status::ExecError);
                }
                self.config[CFG_LOCK_DATA] = LOCKED;
                self.status(Status::Ok);
            }
            _ => self.status(Status::BadParameters),
        }
    }

    fn cmd_nonce(&mut self, mode: u8, data: &[u8]) {
        match mode {
            0x00 | 0x01 => {
                if data.len() != 20 {
                    return self.status(Status::BadParameters);
                }
                let randout = self.rng();
                let mut h = Sha256::new();
                h.update(randout);
                h.update(data);
                h.update([Opcode::Nonce as u8, mode, 0x00]);
                self.tempkey = h.finalize().into();
                self.tempkey_valid = true;
                self.tempkey_source = TempKeySrc::Random;
                self.reply(&randout);
            }
            0x03 => {
                if data.len() != 32 {
                    return self.status(Status::BadParameters);
                }
                self.tempkey.copy_from_slice(data);
                self.tempkey_valid = true;
                self.tempkey_source = TempKeySrc::Input;
                self.status(Status::Ok);
            }
            _ => self.status(Status::BadParameters),
        }
    }

    fn cmd_gen_dig(&mut self, zone: u8, param2: u16, data: &[u8]) {
        if !self.tempkey_valid {
            return self.status(Status::ExecError);
        }
        let slot = param2 as usize;
        let value: [u8; 32] = match zone {
            0x00 => self.config[0..32].try_into().unwrap(),
            0x01 => self.otp[0..32].try_into().unwrap(),
            0x02 if slot < 16 => self.slot_key(slot),
            _ => return self.status(Status::ExecError),
        };
        let sn = self.sn();

        let mut h = Sha256::new();
        h.update(value);
        if data.len() == 4 {
            // CheckOnly slots: host-supplied input replaces the fixed
            // command fields.
            h.update(data);
        } else {
            h.update([Opcode::GenDig as u8, zone]);
            h.update(param2.to_le_bytes());
        }
        h.update([sn[8], sn[0], sn[1]]);
        h.update([0u8; 25]);
        h.update(self.tempkey);
        self.tempkey = h.finalize().into();
        self.status(Status::Ok);
    }

    fn cmd_derive_key(&mut self, param1: u8, param2: u16) {
        let slot = param2 as usize;
        if slot >= 16 {
            return self.status(Status::BadParameters);
        }
        if !self.tempkey_valid || !self.source_matches(param1) {
            return self.status(Status::ExecError);
        }
        let cfg = self.slot_config(slot);
        // Create-mode slots derive from the parent key named by the
        // config; Rolling-mode slots from their current key.
        let base = if cfg.write_key as usize != slot {
            self.slot_key(cfg.write_key as usize)
        } else {
            self.slot_key(slot)
        };
        let sn = self.sn();

        let mut h = Sha256::new();
        h.update(base);
        h.update([Opcode::DeriveKey as u8, param1]);
        h.update(param2.to_le_bytes());
        h.update([sn[8], sn[0], sn[1]]);
        h.update([0u8; 25]);
        h.update(self.tempkey);
        let derived: [u8; 32] = h.finalize().into();
        self.data[slot * 32..slot * 32 + 32].copy_from_slice(&derived);
        self.tempkey_valid = false;
        self.status(Status::Ok);
    }

    fn source_matches(&self, mode: u8) -> bool {
        let wants_input = mode & 0x04 != 0;
        wants_input == (self.tempkey_source == TempKeySrc::Input)
    }

    fn mac_message(
        &self,
        opcode: u8,
        mode: u8,
        param2: u16,
        first: &[u8; 32],
        second: &[u8; 32],
        otp_tail: &[u8; 3],
        sn_mid: &[u8; 4],
        sn_tail: &[u8; 2],
    ) -> [u8; 88] {
        let sn = self.sn();
        let mut msg = [0u8; 88];
        msg[0..32].copy_from_slice(first);
        msg[32..64].copy_from_slice(second);
        msg[64] = opcode;
        msg[65] = mode;
        msg[66..68].copy_from_slice(&param2.to_le_bytes());
        if mode & 0x30 != 0 {
            msg[68..76].copy_from_slice(&self.otp[0..8]);
        }
        msg[76..79].copy_from_slice(otp_tail);
        msg[79] = sn[8];
        msg[80..84].copy_from_slice(sn_mid);
        msg[84..86].copy_from_slice(&sn[0..2]);
        msg[86..88].copy_from_slice(sn_tail);
        msg
    }

    fn own_inclusion_fields(&self, mode: u8) -> ([u8; 3], [u8; 4], [u8; 2]) {
        let sn = self.sn();
        let otp_tail = if mode & 0x10 != 0 {
            self.otp[8..11].try_into().unwrap()
        } else {
            [0u8; 3]
        };
        let (sn_mid, sn_tail) = if mode & 0x40 != 0 {
            (sn[4..8].try_into().unwrap(), sn[2..4].try_into().unwrap())
        } else {
            ([0u8; 4], [0u8; 2])
        };
        (otp_tail, sn_mid, sn_tail)
    }

    fn cmd_mac(&mut self, mode: u8, param2: u16, data: &[u8]) {
        let slot = (param2 as usize) & 0x0f;
        let uses_tempkey = mode & 0x03 != 0;
        if uses_tempkey && (!self.tempkey_valid || !self.source_matches(mode)) {
            return self.status(Status::ExecError);
        }
        let first = if mode & 0x02 != 0 {
            self.tempkey
        } else {
            self.slot_key(slot)
        };
        let second = if mode & 0x01 != 0 {
            self.tempkey
        } else {
            match <[u8; 32]>::try_from(data) {
                Ok(challenge) => challenge,
                Err(_) => return self.status(Status::BadParameters),
            }
        };
        let (otp_tail, sn_mid, sn_tail) = self.own_inclusion_fields(mode);
        let msg = self.mac_message(
            Opcode::Mac as u8,
            mode,
            param2,
            &first,
            &second,
            &otp_tail,
            &sn_mid,
            &sn_tail,
        );
        let mac: [u8; 32] = Sha256::digest(msg).into();
        if uses_tempkey {
            self.tempkey_valid = false;
        }
        self.reply(&mac);
    }

    fn cmd_check_mac(&mut self, mode: u8, param2: u16, data: &[u8]) {
        if data.len() != 77 {
            return self.status(Status::BadParameters);
        }
        let slot = (param2 as usize) & 0x0f;
        let uses_tempkey = mode & 0x03 != 0;
        if uses_tempkey && (!self.tempkey_valid || !self.source_matches(mode)) {
            return self.status(Status::ExecError);
        }
        let challenge: [u8; 32] = data[0..32].try_into().unwrap();
        let client_mac = &data[32..64];
        let other: [u8; 13] = data[64..77].try_into().unwrap();

        let first = if mode & 0x02 != 0 {
            self.tempkey
        } else {
            self.slot_key(slot)
        };
        let second = if mode & 0x01 != 0 { self.tempkey } else { challenge };

        // Rebuild the client's message: command fields and its OTP/SN
        // bytes come from OtherData, OTP[0:7] from this device.
        let sn = self.sn();
        let client_mode = other[1];
        let mut msg = [0u8; 88];
        msg[0..32].copy_from_slice(&first);
        msg[32..64].copy_from_slice(&second);
        msg[64..68].copy_from_slice(&other[0..4]);
        if client_mode & 0x30 != 0 {
            msg[68..76].copy_from_slice(&self.otp[0..8]);
        }
        msg[76..79].copy_from_slice(&other[4..7]);
        msg[79] = sn[8];
        msg[80..84].copy_from_slice(&other[7..11]);
        msg[84..86].copy_from_slice(&sn[0..2]);
        msg[86..88].copy_from_slice(&other[11..13]);

        let expected: [u8; 32] = Sha256::digest(msg).into();
        if uses_tempkey {
            self.tempkey_valid = false;
        }
        if expected.as_slice() == client_mac {
            self.status(Status::Ok)
        } else {
            self.status(Status::CheckMacFail)
        }
    }

    fn cmd_hmac(&mut self, mode: u8, param2: u16) {
        let slot = (param2 as usize) & 0x0f;
        if !self.tempkey_valid || !self.source_matches(mode) {
            return self.status(Status::ExecError);
        }
        let (otp_tail, sn_mid, sn_tail) = self.own_inclusion_fields(mode);
        let tempkey = self.tempkey;
        let msg = self.mac_message(
            Opcode::Hmac as u8,
            mode,
            param2,
            &[0u8; 32],
            &tempkey,
            &otp_tail,
            &sn_mid,
            &sn_tail,
        );
        let mut h = HmacSha256::new_from_slice(&self.slot_key(slot)).expect("any key size works");
        h.update(&msg);
        let out = h.finalize().into_bytes();
        self.tempkey_valid = false;
        self.reply(&out);
    }

    fn cmd_sha(&mut self, mode: u8, data: &[u8]) {
        match mode {
            0x00 => {
                self.sha_state = Some(SHA256_IV);
                self.status(Status::Ok);
            }
            0x01 => {
                let Some(mut state) = self.sha_state else {
                    return self.status(Status::ExecError);
                };
                if data.len() != 64 {
                    return self.status(Status::PaddingError);
                }
                let block = GenericArray::clone_from_slice(data);
                sha2::compress256(&mut state, &[block]);
                self.sha_state = Some(state);

                let mut digest = [0u8; 32];
                for (chunk, word) in digest.chunks_mut(4).zip(state.iter()) {
                    chunk.copy_from_slice(&word.to_be_bytes());
                }
                self.reply(&digest);
            }
            _ => self.status(Status::BadParameters),
        }
    }
}

#[async_trait::async_trait]
impl Transport for EmulatedDevice {
    async fn send(&mut self, buf: &[u8]) -> io::Result<()> {
        if !self.awake {
            // Asleep: traffic is ignored, there is no diagnostic.
            trace!("emulator: frame dropped, device asleep");
            return Ok(());
        }
        match parse_frame(buf) {
            Ok((opcode, param1, param2, data)) => {
                self.dispatch(opcode, param1, param2, &data);
            }
            Err(_) => {
                warn!("emulator: bad command frame");
                self.status(Status::ExecError);
            }
        }
        Ok(())
    }

    async fn receive(&mut self, max_len: usize, _timeout: Duration) -> io::Result<Vec<u8>> {
        match self.response.take() {
            Some(mut frame) => {
                frame.truncate(max_len.max(4));
                Ok(frame)
            }
            None => Err(io::Error::new(io::ErrorKind::TimedOut, "no response")),
        }
    }

    async fn wake(&mut self) -> io::Result<()> {
        self.awake = true;
        self.tempkey_valid = false;
        self.status(Status::Ready);
        Ok(())
    }
}
