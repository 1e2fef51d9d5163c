/*
    SPDX-License-Identifier: Apache-2.0
    SPDX-FileCopyrightText: 2026 sha204 contributors
*/

//! Cryptographic session flows against the emulated device, with every
//! digest recomputed independently from the documented message layouts
//! so the emulator and driver cannot agree by accident.

mod common;

use common::{fresh, personalized, slot_key};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use sha204::device::sha_padded;
use sha204::{
    CheckMacData, Error, ErrorKind, MacMode, NonceMode, Opcode, TempKeySource, TempKeyState, Zone,
    FLAG_ENCRYPT, FLAG_NONE, FLAG_TEMPKEY_SOURCE_INPUT, FLAG_USE_OTP_88_BITS, FLAG_USE_SN,
};

/// Serial number and OTP bytes the emulated part is provisioned with.
const SN: [u8; 9] = [0x01, 0x23, 0x9f, 0x4c, 0xaa, 0x55, 0x83, 0x71, 0xee];

fn otp_head() -> [u8; 11] {
    let mut out = [0u8; 11];
    out[4..8].fill(0x11);
    out[8..11].fill(0x22);
    out
}

/// The 88-byte message MAC and HMAC digest, assembled from the mode
/// bits exactly as the datasheet lays it out.
fn mac_message(
    opcode: Opcode,
    mode: u8,
    param2: u16,
    first: &[u8; 32],
    second: &[u8; 32],
) -> [u8; 88] {
    let otp = otp_head();
    let mut msg = [0u8; 88];
    msg[0..32].copy_from_slice(first);
    msg[32..64].copy_from_slice(second);
    msg[64] = opcode as u8;
    msg[65] = mode;
    msg[66..68].copy_from_slice(&param2.to_le_bytes());
    if mode & 0x30 != 0 {
        msg[68..76].copy_from_slice(&otp[0..8]);
    }
    if mode & 0x10 != 0 {
        msg[76..79].copy_from_slice(&otp[8..11]);
    }
    msg[79] = SN[8];
    if mode & 0x40 != 0 {
        msg[80..84].copy_from_slice(&SN[4..8]);
    }
    msg[84..86].copy_from_slice(&SN[0..2]);
    if mode & 0x40 != 0 {
        msg[86..88].copy_from_slice(&SN[2..4]);
    }
    msg
}

#[tokio::test]
async fn mac_matches_direct_computation() {
    let mut dev = personalized().await;
    let challenge = [0xc1u8; 32];

    let mac = dev
        .mac(MacMode::SlotChallenge, 3, Some(&challenge), FLAG_NONE)
        .await
        .unwrap();

    let msg = mac_message(Opcode::Mac, 0x00, 3, &slot_key(3), &challenge);
    let expected: [u8; 32] = Sha256::digest(msg).into();
    assert_eq!(mac, expected);
}

#[tokio::test]
async fn mac_folds_in_otp_and_serial_number() {
    let mut dev = personalized().await;
    let challenge = [0x0fu8; 32];
    let flags = FLAG_USE_OTP_88_BITS | FLAG_USE_SN;

    let mac = dev
        .mac(MacMode::SlotChallenge, 5, Some(&challenge), flags)
        .await
        .unwrap();

    let msg = mac_message(Opcode::Mac, 0x50, 5, &slot_key(5), &challenge);
    let expected: [u8; 32] = Sha256::digest(msg).into();
    assert_eq!(mac, expected);
}

#[tokio::test]
async fn check_mac_verifies_and_rejects() {
    let mut dev = personalized().await;
    let challenge = [0x3cu8; 32];

    let mac = dev
        .mac(MacMode::SlotChallenge, 4, Some(&challenge), FLAG_NONE)
        .await
        .unwrap();

    let data = CheckMacData {
        challenge: &challenge,
        slot: 4,
        flags: FLAG_NONE,
        otp: None,
        sn: None,
    };
    dev.check_mac(MacMode::SlotChallenge, 4, FLAG_NONE, &data, &mac)
        .await
        .unwrap();

    let mut bad = mac;
    bad[7] ^= 0x01;
    let err = dev
        .check_mac(MacMode::SlotChallenge, 4, FLAG_NONE, &data, &bad)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::CheckMacFailed));
    assert_eq!(err.kind(), ErrorKind::Authentication);
}

#[tokio::test]
async fn passthrough_nonce_feeds_mac_once() {
    let mut dev = personalized().await;
    let secret = [0xabu8; 32];

    assert_eq!(dev.nonce(NonceMode::Passthrough, &secret).await.unwrap(), None);
    assert_eq!(dev.temp_key(), TempKeyState::Nonce(TempKeySource::Input));

    let mac = dev
        .mac(MacMode::SlotTempKey, 2, None, FLAG_TEMPKEY_SOURCE_INPUT)
        .await
        .unwrap();
    let msg = mac_message(Opcode::Mac, 0x05, 2, &slot_key(2), &secret);
    let expected: [u8; 32] = Sha256::digest(msg).into();
    assert_eq!(mac, expected);

    // TempKey is consumed; replaying the same command must fail.
    assert_eq!(dev.temp_key(), TempKeyState::Invalid);
    let err = dev
        .mac(MacMode::SlotTempKey, 2, None, FLAG_TEMPKEY_SOURCE_INPUT)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DeviceExec);
}

#[tokio::test]
async fn tempkey_source_flag_must_match_nonce_mode() {
    let mut dev = personalized().await;
    dev.nonce(NonceMode::Passthrough, &[0u8; 32]).await.unwrap();

    // TempKey came from host input but the flags claim the RNG.
    let err = dev
        .mac(MacMode::SlotTempKey, 2, None, FLAG_NONE)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DeviceExec);
    assert_eq!(dev.temp_key(), TempKeyState::Invalid);
}

#[tokio::test]
async fn random_nonce_derives_tempkey_from_rng_output() {
    let mut dev = personalized().await;
    let input = [0x11u8; 20];
    let challenge = [0xeeu8; 32];

    let randout = dev.nonce(NonceMode::Random, &input).await.unwrap().unwrap();
    assert_eq!(dev.temp_key(), TempKeyState::Nonce(TempKeySource::Random));

    let mut h = Sha256::new();
    h.update(randout);
    h.update(input);
    h.update([Opcode::Nonce as u8, 0x00, 0x00]);
    let tempkey: [u8; 32] = h.finalize().into();

    let mac = dev
        .mac(MacMode::TempKeyChallenge, 0, Some(&challenge), FLAG_NONE)
        .await
        .unwrap();
    let msg = mac_message(Opcode::Mac, 0x02, 0, &tempkey, &challenge);
    let expected: [u8; 32] = Sha256::digest(msg).into();
    assert_eq!(mac, expected);
}

#[tokio::test]
async fn gen_digest_requires_a_prior_nonce() {
    let mut dev = personalized().await;
    let err = dev.gen_digest(Zone::Data, 0, None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DeviceExec);
    assert_eq!(dev.temp_key(), TempKeyState::Invalid);
}

#[tokio::test]
async fn gen_digest_then_hmac() {
    let mut dev = personalized().await;
    let secret = [0x77u8; 32];

    dev.nonce(NonceMode::Passthrough, &secret).await.unwrap();
    dev.gen_digest(Zone::Data, 4, None).await.unwrap();
    assert_eq!(dev.temp_key(), TempKeyState::GenDig(TempKeySource::Input));

    let mut h = Sha256::new();
    h.update(slot_key(4));
    h.update([Opcode::GenDig as u8, Zone::Data as u8]);
    h.update(4u16.to_le_bytes());
    h.update([SN[8], SN[0], SN[1]]);
    h.update([0u8; 25]);
    h.update(secret);
    let tempkey: [u8; 32] = h.finalize().into();

    let out = dev.hmac(2, FLAG_TEMPKEY_SOURCE_INPUT).await.unwrap();

    let msg = mac_message(Opcode::Hmac, 0x04, 2, &[0u8; 32], &tempkey);
    let mut mac = Hmac::<Sha256>::new_from_slice(&slot_key(2)).unwrap();
    mac.update(&msg);
    let expected: [u8; 32] = mac.finalize().into_bytes().into();
    assert_eq!(out, expected);
    assert_eq!(dev.temp_key(), TempKeyState::Invalid);
}

#[tokio::test]
async fn derive_key_creates_child_from_parent() {
    let mut dev = personalized().await;
    let secret = [0x42u8; 32];
    let challenge = [0x99u8; 32];

    dev.nonce(NonceMode::Passthrough, &secret).await.unwrap();
    dev.derive_key(1, None, FLAG_TEMPKEY_SOURCE_INPUT).await.unwrap();
    assert_eq!(dev.temp_key(), TempKeyState::Invalid);

    // Slot 1 names slot 0 as its write key, so this is a Create-mode
    // derivation from the parent key.
    let mut h = Sha256::new();
    h.update(slot_key(0));
    h.update([Opcode::DeriveKey as u8, 0x04]);
    h.update(1u16.to_le_bytes());
    h.update([SN[8], SN[0], SN[1]]);
    h.update([0u8; 25]);
    h.update(secret);
    let derived: [u8; 32] = h.finalize().into();

    let mac = dev
        .mac(MacMode::SlotChallenge, 1, Some(&challenge), FLAG_NONE)
        .await
        .unwrap();
    let msg = mac_message(Opcode::Mac, 0x00, 1, &derived, &challenge);
    let expected: [u8; 32] = Sha256::digest(msg).into();
    assert_eq!(mac, expected);
}

fn xor32(a: &[u8], b: &[u8; 32]) -> [u8; 32] {
    let mut out = [0u8; 32];
    for (i, o) in out.iter_mut().enumerate() {
        *o = a[i] ^ b[i];
    }
    out
}

#[tokio::test]
async fn encrypted_read_requires_prior_gen_dig() {
    let mut dev = personalized().await;

    // Slot 9 is EncryptedRead; without key material in TempKey the
    // device refuses, and the host cannot pre-validate that.
    let err = dev.read(Zone::Data, 9).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DeviceExec);
}

#[tokio::test]
async fn encrypted_read_ciphertext_recovers_with_tempkey() {
    let mut dev = personalized().await;
    let secret = [0x6au8; 32];

    // Slot 9's read key is slot 0; GenDig folds it into TempKey.
    dev.nonce(NonceMode::Passthrough, &secret).await.unwrap();
    dev.gen_digest(Zone::Data, 0, None).await.unwrap();

    let mut h = Sha256::new();
    h.update(slot_key(0));
    h.update([Opcode::GenDig as u8, Zone::Data as u8]);
    h.update(0u16.to_le_bytes());
    h.update([SN[8], SN[0], SN[1]]);
    h.update([0u8; 25]);
    h.update(secret);
    let tempkey: [u8; 32] = h.finalize().into();

    // The driver moves the ciphertext verbatim; deciphering is ours.
    let ciphertext = dev.read(Zone::Data, 9).await.unwrap();
    assert_ne!(ciphertext, slot_key(9));
    assert_eq!(xor32(&ciphertext, &tempkey), slot_key(9));
}

#[tokio::test]
async fn encrypted_write_needs_flag_and_tempkey() {
    let mut dev = personalized().await;
    let secret = [0x2du8; 32];
    let new_key = [0xb4u8; 32];
    let challenge = [0x13u8; 32];

    // Slot 9 only takes encrypted writes once Data is locked: a plain
    // write fails, and so does the flag without TempKey loaded.
    let err = dev
        .write(Zone::Data, 9, FLAG_NONE, &new_key)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DeviceExec);
    let err = dev
        .write(Zone::Data, 9, FLAG_ENCRYPT, &new_key)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DeviceExec);

    // With TempKey loaded the device deciphers what we send, so the
    // wire carries new_key XOR TempKey.
    dev.nonce(NonceMode::Passthrough, &secret).await.unwrap();
    let ciphertext = xor32(&new_key, &secret);
    dev.write(Zone::Data, 9, FLAG_ENCRYPT, &ciphertext).await.unwrap();

    // The slot now MACs as new_key.
    let mac = dev
        .mac(MacMode::SlotChallenge, 9, Some(&challenge), FLAG_NONE)
        .await
        .unwrap();
    let msg = mac_message(Opcode::Mac, 0x00, 9, &new_key, &challenge);
    let expected: [u8; 32] = Sha256::digest(msg).into();
    assert_eq!(mac, expected);
}

#[tokio::test]
async fn sha_matches_software_digest() {
    let mut dev = fresh();
    dev.wake().await.unwrap();

    let msg: Vec<u8> = (0u8..100).collect();
    let digest = dev.sha(&sha_padded(&msg)).await.unwrap();
    let expected: [u8; 32] = Sha256::digest(&msg).into();
    assert_eq!(digest, expected);
}

#[tokio::test]
async fn sha_rejects_unaligned_input_locally() {
    let mut dev = fresh();
    let err = dev.sha(&[0u8; 60]).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Parameter);
}

#[tokio::test]
async fn sha_compute_needs_init_first() {
    let mut dev = fresh();
    dev.wake().await.unwrap();
    let err = dev.sha_compute(&[0u8; 64]).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DeviceExec);
}
