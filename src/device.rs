/*
    SPDX-License-Identifier: Apache-2.0
    SPDX-FileCopyrightText: 2026 sha204 contributors
*/

//! Device-facing operations and the session descriptor.
//!
//! Every public operation is a thin composition of protocol commands
//! plus the host-side bookkeeping of what the device's TempKey register
//! is expected to hold. Device-reported errors are propagated
//! unchanged; the only thing added here is parameter validation.

use crate::command::{self, Opcode};
use crate::error::{Error, Result};
use crate::transport::Transport;
use crate::zone::{
    self, LockState, OtpMode, Zone, LOCK_ADDR, LOCK_CONFIG_OFFSET, LOCK_DATA_OFFSET,
    OTP_MODE_ADDR, OTP_MODE_OFFSET, SERIALNBR_ADDR0_3, SERIALNBR_ADDR4_7, SERIALNBR_ADDR8,
};
use log::{debug, info};

pub const CHALLENGE_LEN: usize = 32;
pub const DEVREV_LEN: usize = 4;
pub const GENDIG_INPUT_LEN: usize = 4;
pub const HMAC_LEN: usize = 32;
pub const KEY_LEN: usize = 32;
pub const MAC_LEN: usize = 32;
pub const NONCE_INPUT_LEN: usize = 20;
pub const RANDOM_LEN: usize = 32;
pub const SERIAL_NUMBER_LEN: usize = 9;
pub const SHA_LEN: usize = 32;
pub const SHA_BLOCK_LEN: usize = 64;

/// Operation flags. `TEMPKEY_SOURCE_*` states which Nonce mode loaded
/// TempKey and must match the device's own record; `USE_OTP_*` /
/// `USE_SN` fold device OTP / serial-number bytes into MAC and HMAC
/// input messages; `ENCRYPT` requests an encrypted read or write.
pub const FLAG_NONE: u32 = 0x00;
pub const FLAG_TEMPKEY_SOURCE_INPUT: u32 = 0x01;
pub const FLAG_TEMPKEY_SOURCE_RANDOM: u32 = 0x02;
pub const FLAG_USE_OTP_64_BITS: u32 = 0x04;
pub const FLAG_USE_OTP_88_BITS: u32 = 0x08;
pub const FLAG_USE_SN: u32 = 0x10;
pub const FLAG_ENCRYPT: u32 = 0x20;

const MODE_TEMPKEY_SOURCE_SHIFT: u8 = 2;
const MODE_USE_OTP_88_SHIFT: u8 = 4;
const MODE_USE_OTP_64_SHIFT: u8 = 5;
const MODE_USE_SN_SHIFT: u8 = 6;

/// Wire flag on param1 of Read/Write selecting 32-byte access.
const ZONE_ACCESS_32: u8 = 0x80;
/// Wire flag on param1 of Write requesting an encrypted transfer.
const ZONE_ENCRYPTED: u8 = 0x40;

/// Supported device variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceVariant {
    AtSha204a,
}

/// Input composition for MAC: which 32-byte halves of the message come
/// from a key slot, the input challenge, or TempKey.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacMode {
    /// 1st 32 bytes: slot key, 2nd 32 bytes: input challenge.
    SlotChallenge = 0,
    /// 1st 32 bytes: slot key, 2nd 32 bytes: TempKey.
    SlotTempKey = 1,
    /// 1st 32 bytes: TempKey, 2nd 32 bytes: input challenge.
    TempKeyChallenge = 2,
    /// Both halves from TempKey.
    TempKeyTempKey = 3,
}

impl MacMode {
    fn uses_challenge(self) -> bool {
        matches!(self, MacMode::SlotChallenge | MacMode::TempKeyChallenge)
    }

    fn uses_tempkey(self) -> bool {
        !matches!(self, MacMode::SlotChallenge)
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NonceMode {
    /// Combine a 20-byte host input with the RNG, updating the seed.
    Random = 0x00,
    /// As `Random`, without updating the seed first.
    RandomNoSeed = 0x01,
    /// Load a 32-byte host input into TempKey verbatim.
    Passthrough = 0x03,
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RandomMode {
    UpdateSeed = 0x00,
    NoUpdateSeed = 0x01,
}

/// Which Nonce mode fed TempKey; the device records the same flag and
/// refuses operations whose mode bit disagrees.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TempKeySource {
    Random,
    Input,
}

/// Host-side expectation of the device's TempKey register.
///
/// No key material is cached; this is protocol bookkeeping only,
/// advanced by Nonce and GenDig, cleared when an operation consumes
/// TempKey or fails. It is exposed for inspection and testing but not
/// enforced: sequencing mistakes (e.g. GenDig before any Nonce) are
/// the device's to reject and surface as execution errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TempKeyState {
    Invalid,
    Nonce(TempKeySource),
    GenDig(TempKeySource),
}

impl TempKeyState {
    fn source(self) -> Option<TempKeySource> {
        match self {
            TempKeyState::Invalid => None,
            TempKeyState::Nonce(s) | TempKeyState::GenDig(s) => Some(s),
        }
    }
}

/// Parameters the client used to generate the MAC under verification;
/// folded into the CheckMAC OtherData block.
#[derive(Debug, Clone, Copy)]
pub struct CheckMacData<'a> {
    /// Challenge the client MACed (ignored for TempKey-only modes).
    pub challenge: &'a [u8],
    /// Slot the client used.
    pub slot: u8,
    /// Flags the client used (TempKey source, OTP/SN inclusion).
    pub flags: u32,
    /// Client OTP bytes 0..11, required with the OTP flags.
    pub otp: Option<&'a [u8]>,
    /// Client serial number (9 bytes), required with `FLAG_USE_SN`.
    pub sn: Option<&'a [u8]>,
}

fn mode_flag_bits(flags: u32) -> u8 {
    let mut mode = 0u8;
    if flags & FLAG_TEMPKEY_SOURCE_INPUT != 0 {
        mode |= 1 << MODE_TEMPKEY_SOURCE_SHIFT;
    }
    if flags & FLAG_USE_OTP_88_BITS != 0 {
        mode |= 1 << MODE_USE_OTP_88_SHIFT;
    }
    if flags & FLAG_USE_OTP_64_BITS != 0 {
        mode |= 1 << MODE_USE_OTP_64_SHIFT;
    }
    if flags & FLAG_USE_SN != 0 {
        mode |= 1 << MODE_USE_SN_SHIFT;
    }
    mode
}

/// Session descriptor: a selected device variant bound to a transport.
///
/// Construction is initialization; dropping it is cleanup. The device
/// executes strictly one command at a time, so all operations take
/// `&mut self` and a descriptor must not be shared without external
/// serialization. Independent descriptors on independent transports
/// are unrelated.
#[derive(Debug)]
pub struct Sha204 {
    variant: DeviceVariant,
    transport: Box<dyn Transport>,
    tempkey: TempKeyState,
}

impl Sha204 {
    pub fn new(variant: DeviceVariant, transport: Box<dyn Transport>) -> Self {
        info!("Initialized {:?} descriptor", variant);
        Sha204 {
            variant,
            transport,
            tempkey: TempKeyState::Invalid,
        }
    }

    pub fn variant(&self) -> DeviceVariant {
        self.variant
    }

    /// The host's current expectation of the device TempKey register.
    pub fn temp_key(&self) -> TempKeyState {
        self.tempkey
    }

    /// Release the bound transport, ending the session.
    pub fn into_transport(self) -> Box<dyn Transport> {
        self.transport
    }

    /// Wake the device. All subsequent commands must complete within
    /// [`command::WATCHDOG_TIME`] or the device silently sleeps again;
    /// past that point responses stop and surface as timeouts.
    pub async fn wake(&mut self) -> Result<()> {
        self.tempkey = TempKeyState::Invalid;
        command::wake(self.transport.as_mut()).await
    }

    /// Idle devices whose Selector config byte does not match.
    pub async fn pause(&mut self, selector: u8) -> Result<()> {
        self.run(Opcode::Pause, selector, 0, &[], 1).await.map(drop)
    }

    /// Device revision, 4 bytes, no side effects.
    pub async fn devrev(&mut self) -> Result<[u8; 4]> {
        let resp = self.run(Opcode::DevRev, 0, 0, &[], DEVREV_LEN).await?;
        Ok(resp.try_into().expect("length checked by protocol layer"))
    }

    /// 32 bytes from the device RNG. The internal seed is updated
    /// first unless `NoUpdateSeed` is requested.
    pub async fn random(&mut self, mode: RandomMode) -> Result<[u8; 32]> {
        let resp = self
            .run(Opcode::Random, mode as u8, 0, &[], RANDOM_LEN)
            .await?;
        Ok(resp.try_into().expect("length checked by protocol layer"))
    }

    /// Load TempKey. Random modes combine a 20-byte host input with
    /// the RNG and return the RNG output; Passthrough loads a 32-byte
    /// input verbatim and returns `None`.
    pub async fn nonce(&mut self, mode: NonceMode, input: &[u8]) -> Result<Option<[u8; 32]>> {
        let (expected_len, resp_len, source) = match mode {
            NonceMode::Random | NonceMode::RandomNoSeed => {
                (NONCE_INPUT_LEN, RANDOM_LEN, TempKeySource::Random)
            }
            NonceMode::Passthrough => (CHALLENGE_LEN, 1, TempKeySource::Input),
        };
        if input.len() != expected_len {
            return Err(Error::BadParameters("nonce input length"));
        }

        let resp = self.run(Opcode::Nonce, mode as u8, 0, input, resp_len).await?;
        self.tempkey = TempKeyState::Nonce(source);
        Ok(match mode {
            NonceMode::Passthrough => None,
            _ => Some(resp.try_into().expect("length checked by protocol layer")),
        })
    }

    /// Overwrite TempKey with the SHA-256 of its current value and a
    /// zone/slot value. Requires a prior `nonce` in this session; that
    /// ordering is a contract with the device, not re-verified here,
    /// and breaking it comes back as an execution error.
    ///
    /// For CheckOnly slots `data` supplies a 4-byte input used in
    /// place of the stored value, e.g. to build ephemeral keys.
    pub async fn gen_digest(&mut self, zone: Zone, slot: u8, data: Option<&[u8]>) -> Result<()> {
        if slot >= zone.unit_count() {
            return Err(Error::BadParameters("zone id out of range"));
        }
        let payload = match data {
            Some(d) if d.len() != GENDIG_INPUT_LEN => {
                return Err(Error::BadParameters("gendig input length"));
            }
            Some(d) => d,
            None => &[][..],
        };

        self.run(Opcode::GenDig, zone as u8, slot as u16, payload, 1)
            .await?;
        let source = self.tempkey.source().unwrap_or(TempKeySource::Random);
        self.tempkey = TempKeyState::GenDig(source);
        Ok(())
    }

    /// Derive a new key into `slot` by hashing its parent key (Create
    /// mode) or current key (Rolling mode) with TempKey. One-way: no
    /// operation reverses a derivation. An authorizing MAC may be
    /// required by the slot's configuration.
    ///
    /// `flags` must state the TempKey source used with `nonce`.
    pub async fn derive_key(&mut self, slot: u8, mac: Option<&[u8]>, flags: u32) -> Result<()> {
        if slot >= zone::DATA_NUM_SLOTS {
            return Err(Error::BadParameters("slot out of range"));
        }
        let payload = match mac {
            Some(m) if m.len() != MAC_LEN => {
                return Err(Error::BadParameters("derive key mac length"));
            }
            Some(m) => m,
            None => &[][..],
        };
        let param1 = mode_flag_bits(flags & (FLAG_TEMPKEY_SOURCE_INPUT | FLAG_TEMPKEY_SOURCE_RANDOM));

        debug!("DeriveKey into slot {}", slot);
        let res = self
            .run(Opcode::DeriveKey, param1, slot as u16, payload, 1)
            .await;
        // The device writes TempKey into the slot and invalidates it.
        self.tempkey = TempKeyState::Invalid;
        res.map(drop)
    }

    /// Generate a MAC over slot key / challenge / TempKey halves per
    /// `mode`, with optional OTP and serial-number inclusion per
    /// `flags`.
    pub async fn mac(
        &mut self,
        mode: MacMode,
        slot: u8,
        challenge: Option<&[u8]>,
        flags: u32,
    ) -> Result<[u8; 32]> {
        if slot >= zone::DATA_NUM_SLOTS {
            return Err(Error::BadParameters("slot out of range"));
        }
        let payload = match (mode.uses_challenge(), challenge) {
            (true, Some(c)) if c.len() == CHALLENGE_LEN => c,
            (true, _) => return Err(Error::BadParameters("mac challenge length")),
            (false, _) => &[][..],
        };
        let param1 = mode as u8 | mode_flag_bits(flags);

        let res = self
            .run(Opcode::Mac, param1, slot as u16, payload, MAC_LEN)
            .await;
        if mode.uses_tempkey() {
            self.tempkey = TempKeyState::Invalid;
        }
        Ok(res?.try_into().expect("length checked by protocol layer"))
    }

    /// Verify a MAC generated by another device; the counterpart of
    /// [`Sha204::mac`] in a challenge-response exchange. `mode`, `slot`
    /// and `flags` select this device's inputs; `data` carries the
    /// client's generation parameters.
    ///
    /// A mismatch is an authentication failure, distinct from any
    /// communication or execution error: the exchange itself succeeded.
    pub async fn check_mac(
        &mut self,
        mode: MacMode,
        slot: u8,
        flags: u32,
        data: &CheckMacData<'_>,
        mac: &[u8],
    ) -> Result<()> {
        if slot >= zone::DATA_NUM_SLOTS {
            return Err(Error::BadParameters("slot out of range"));
        }
        if mac.len() != MAC_LEN {
            return Err(Error::BadParameters("mac length"));
        }
        if mode.uses_challenge() && data.challenge.len() != CHALLENGE_LEN {
            return Err(Error::BadParameters("challenge length"));
        }

        let mut payload = Vec::with_capacity(77);
        if mode.uses_challenge() {
            payload.extend_from_slice(data.challenge);
        } else {
            payload.extend_from_slice(&[0u8; CHALLENGE_LEN]);
        }
        payload.extend_from_slice(mac);
        payload.extend_from_slice(&other_data(mode, data)?);

        let param1 = mode as u8 | mode_flag_bits(flags);
        let res = self
            .run(Opcode::CheckMac, param1, slot as u16, &payload, 1)
            .await;
        if mode.uses_tempkey() {
            self.tempkey = TempKeyState::Invalid;
        }
        res.map(drop)
    }

    /// HMAC-SHA256 over TempKey and the key in `slot`, with optional
    /// OTP/serial-number inclusion mirroring [`Sha204::mac`]. TempKey
    /// must have been loaded with `nonce` (and optionally `gen_digest`)
    /// first.
    pub async fn hmac(&mut self, slot: u8, flags: u32) -> Result<[u8; 32]> {
        if slot >= zone::DATA_NUM_SLOTS {
            return Err(Error::BadParameters("slot out of range"));
        }
        let param1 = mode_flag_bits(flags);
        let res = self.run(Opcode::Hmac, param1, slot as u16, &[], HMAC_LEN).await;
        self.tempkey = TempKeyState::Invalid;
        Ok(res?.try_into().expect("length checked by protocol layer"))
    }

    /// Start a SHA-256 computation.
    pub async fn sha_init(&mut self) -> Result<()> {
        self.run(Opcode::Sha, 0x00, 0, &[], 1).await.map(drop)
    }

    /// Feed one 64-byte block and return the running digest.
    pub async fn sha_compute(&mut self, block: &[u8]) -> Result<[u8; 32]> {
        if block.len() != SHA_BLOCK_LEN {
            return Err(Error::BadParameters("sha block length"));
        }
        let resp = self.run(Opcode::Sha, 0x01, 0, block, SHA_LEN).await?;
        Ok(resp.try_into().expect("length checked by protocol layer"))
    }

    /// Hash a message already padded per FIPS 180-2 into whole 64-byte
    /// blocks. Padding is the caller's job; an unpadded length is a
    /// parameter error here and a padding error on the device.
    pub async fn sha(&mut self, padded: &[u8]) -> Result<[u8; 32]> {
        if padded.is_empty() || padded.len() % SHA_BLOCK_LEN != 0 {
            return Err(Error::BadParameters("sha input not block aligned"));
        }
        self.sha_init().await?;
        let mut digest = [0u8; SHA_LEN];
        for block in padded.chunks(SHA_BLOCK_LEN) {
            digest = self.sha_compute(block).await?;
        }
        Ok(digest)
    }

    /// Read one Config/OTP word or Data slot. Reads never have side
    /// effects; encrypted-read slots return ciphertext the caller
    /// deciphers with the TempKey it arranged via `gen_digest`.
    pub async fn read(&mut self, zone: Zone, id: u8) -> Result<Vec<u8>> {
        let addr = zone.unit_addr(id)?;
        let size = zone.access_size();
        let mut param1 = zone as u8;
        if size == 32 {
            param1 |= ZONE_ACCESS_32;
        }
        self.run(Opcode::Read, param1, addr, &[], size).await
    }

    /// Write one Config/OTP word or Data slot, subject to the zone
    /// legality matrix (enforced by the device). Sizes are fixed per
    /// zone and checked before anything is sent.
    pub async fn write(&mut self, zone: Zone, id: u8, flags: u32, data: &[u8]) -> Result<()> {
        let addr = zone.unit_addr(id)?;
        if data.len() != zone.access_size() {
            return Err(Error::BadParameters("write size does not match zone"));
        }
        let mut param1 = zone as u8;
        if data.len() == 32 {
            param1 |= ZONE_ACCESS_32;
        }
        if flags & FLAG_ENCRYPT != 0 {
            param1 |= ZONE_ENCRYPTED;
        }
        self.run(Opcode::Write, param1, addr, data, 1).await.map(drop)
    }

    /// Program one 32-byte OTP block. Only legal between the Config
    /// lock and the Data/OTP lock, when the device accepts nothing
    /// smaller than full blocks in the OTP zone.
    pub async fn write_otp_block(&mut self, block: u8, data: &[u8]) -> Result<()> {
        let addr = zone::otp_block_addr(block)?;
        if data.len() != zone::BLOCK_SIZE {
            return Err(Error::BadParameters("otp block size"));
        }
        let param1 = Zone::Otp as u8 | ZONE_ACCESS_32;
        self.run(Opcode::Write, param1, addr, data, 1).await.map(drop)
    }

    /// Irreversibly lock a zone. `Config` locks the Config zone;
    /// `Data` locks Data and OTP together. Locking OTP alone does not
    /// exist on the device and is rejected as invalid input.
    ///
    /// `crc` must be the CRC-16 of the zone's entire current contents
    /// (Data followed by OTP for the Data lock); the device recomputes
    /// it over its stored bytes and refuses to lock on mismatch, which
    /// leaves the zone unlocked.
    pub async fn lock_zone(&mut self, zone: Zone, crc: u16) -> Result<()> {
        let param1 = match zone {
            Zone::Config => 0x00,
            Zone::Data => 0x01,
            Zone::Otp => return Err(Error::BadParameters("otp cannot be locked alone")),
        };
        info!("Locking {:?} zone, crc 0x{:04x}", zone, crc);
        self.run(Opcode::Lock, param1, crc, &[], 1).await.map(drop)
    }

    /// Lock state of the Config zone.
    pub async fn lock_config(&mut self) -> Result<LockState> {
        let word = self.read(Zone::Config, LOCK_ADDR as u8).await?;
        LockState::from_byte(word[LOCK_CONFIG_OFFSET]).ok_or(Error::MalformedResponse)
    }

    /// Lock state of the Data/OTP zones.
    pub async fn lock_data(&mut self) -> Result<LockState> {
        let word = self.read(Zone::Config, LOCK_ADDR as u8).await?;
        LockState::from_byte(word[LOCK_DATA_OFFSET]).ok_or(Error::MalformedResponse)
    }

    /// OTP zone operating mode, from the Config zone.
    pub async fn otp_mode(&mut self) -> Result<OtpMode> {
        let word = self.read(Zone::Config, OTP_MODE_ADDR as u8).await?;
        OtpMode::from_byte(word[OTP_MODE_OFFSET]).ok_or(Error::MalformedResponse)
    }

    /// The 9-byte device serial number, assembled from three Config
    /// zone reads. No side effects.
    pub async fn serial_number(&mut self) -> Result<[u8; 9]> {
        let mut sn = [0u8; SERIAL_NUMBER_LEN];
        let w0 = self.read(Zone::Config, SERIALNBR_ADDR0_3 as u8).await?;
        sn[0..4].copy_from_slice(&w0);
        let w2 = self.read(Zone::Config, SERIALNBR_ADDR4_7 as u8).await?;
        sn[4..8].copy_from_slice(&w2);
        let w3 = self.read(Zone::Config, SERIALNBR_ADDR8 as u8).await?;
        sn[8] = w3[0];
        Ok(sn)
    }

    /// Issue one command; any failure clears the TempKey expectation,
    /// since the register's state can no longer be assumed.
    async fn run(
        &mut self,
        opcode: Opcode,
        param1: u8,
        param2: u16,
        data: &[u8],
        resp_len: usize,
    ) -> Result<Vec<u8>> {
        let res = command::execute(self.transport.as_mut(), opcode, param1, param2, data, resp_len)
            .await;
        if res.is_err() {
            self.tempkey = TempKeyState::Invalid;
        }
        res
    }
}

/// Append FIPS 180-2 padding to `msg`, producing the whole 64-byte
/// blocks [`Sha204::sha`] expects. The device itself never pads.
pub fn sha_padded(msg: &[u8]) -> Vec<u8> {
    let mut out = msg.to_vec();
    out.push(0x80);
    while out.len() % SHA_BLOCK_LEN != 56 {
        out.push(0x00);
    }
    out.extend_from_slice(&((msg.len() as u64) * 8).to_be_bytes());
    out
}

/// The 13-byte OtherData block of CheckMAC: the client-side command
/// fields the device needs to rebuild the client's MAC input message.
fn other_data(mode: MacMode, data: &CheckMacData<'_>) -> Result<[u8; 13]> {
    let mut out = [0u8; 13];
    out[0] = Opcode::Mac as u8;
    // The client's mode byte: same composition as the verification,
    // inclusion bits from the client's flags.
    out[1] = mode as u8 | mode_flag_bits(data.flags);
    out[2..4].copy_from_slice(&(data.slot as u16).to_le_bytes());

    if data.flags & (FLAG_USE_OTP_64_BITS | FLAG_USE_OTP_88_BITS) != 0 {
        let otp = data
            .otp
            .ok_or(Error::BadParameters("otp data required by flags"))?;
        if otp.len() < 11 {
            return Err(Error::BadParameters("otp data too short"));
        }
        out[4..7].copy_from_slice(&otp[8..11]);
    }
    if data.flags & FLAG_USE_SN != 0 {
        let sn = data
            .sn
            .ok_or(Error::BadParameters("serial number required by flags"))?;
        if sn.len() < SERIAL_NUMBER_LEN {
            return Err(Error::BadParameters("serial number too short"));
        }
        out[7..11].copy_from_slice(&sn[4..8]);
        out[11..13].copy_from_slice(&sn[2..4]);
    }
    Ok(out)
}
