/*
    SPDX-License-Identifier: Apache-2.0
    SPDX-FileCopyrightText: 2026 sha204 contributors
*/

//! Command protocol layer: frame building and parsing, status byte
//! interpretation and the send/wait/receive cycle for a single command.
//!
//! One command is in flight at a time; the device has no pipelining.

use crate::crc::crc16;
use crate::error::{Error, Result};
use crate::transport::Transport;
use log::{debug, trace};
use std::time::Duration;

/// Frame overhead: count(1) + opcode(1) + param1(1) + param2(2) + crc(2).
const FRAME_OVERHEAD: usize = 7;

/// Largest command frame (CheckMac: 77 bytes of data).
pub const MAX_FRAME_LEN: usize = FRAME_OVERHEAD + 77;

/// Largest response frame (count + 32 bytes + crc).
pub const MAX_RESPONSE_LEN: usize = 35;

/// Window after wake during which all commands of a session must
/// complete before the device silently re-enters sleep.
pub const WATCHDOG_TIME: Duration = Duration::from_millis(1700);

/// Grace period for the response after the documented execution time.
const RESPONSE_TIMEOUT: Duration = Duration::from_millis(250);

/// Command opcodes, section 8.5.4 of the datasheet.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Pause = 0x01,
    Read = 0x02,
    Mac = 0x08,
    Hmac = 0x11,
    Write = 0x12,
    GenDig = 0x15,
    Nonce = 0x16,
    Lock = 0x17,
    Random = 0x1b,
    DeriveKey = 0x1c,
    CheckMac = 0x28,
    DevRev = 0x30,
    Sha = 0x47,
}

impl Opcode {
    /// Maximum documented execution time. The protocol layer waits this
    /// long after transmission before reading the response.
    pub fn exec_time(self) -> Duration {
        let ms = match self {
            Opcode::Pause => 2,
            Opcode::Read => 4,
            Opcode::Mac => 35,
            Opcode::Hmac => 69,
            Opcode::Write => 42,
            Opcode::GenDig => 43,
            Opcode::Nonce => 60,
            Opcode::Lock => 24,
            Opcode::Random => 50,
            Opcode::DeriveKey => 62,
            Opcode::CheckMac => 38,
            Opcode::DevRev => 2,
            Opcode::Sha => 22,
        };
        Duration::from_millis(ms)
    }

    /// Legal data payload sizes for this opcode. Checked before framing
    /// so a malformed command is never put on the wire.
    fn payload_sizes(self) -> &'static [usize] {
        match self {
            Opcode::Pause | Opcode::Hmac | Opcode::Lock | Opcode::Random | Opcode::DevRev => &[0],
            Opcode::Read => &[0],
            Opcode::Mac => &[0, 32],
            Opcode::Write => &[4, 32],
            Opcode::GenDig => &[0, 4],
            Opcode::Nonce => &[20, 32],
            Opcode::DeriveKey => &[0, 32],
            Opcode::CheckMac => &[77],
            Opcode::Sha => &[0, 64],
        }
    }
}

/// Status bytes the device reports in a 4-byte response frame.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok = 0x00,
    CheckMacFail = 0x01,
    ExecError = 0x0f,
    Ready = 0x11,
    PaddingError = 0x98,
    BadParameters = 0x99,
}

impl Status {
    pub fn from_byte(byte: u8) -> Option<Status> {
        match byte {
            0x00 => Some(Status::Ok),
            0x01 => Some(Status::CheckMacFail),
            0x0f => Some(Status::ExecError),
            0x11 => Some(Status::Ready),
            0x98 => Some(Status::PaddingError),
            0x99 => Some(Status::BadParameters),
            _ => None,
        }
    }
}

/// Serialize a command frame:
/// `[count][opcode][param1][param2 LE][data...][crc LE]`,
/// count covering the whole frame, CRC covering count..data.
pub fn build_frame(opcode: Opcode, param1: u8, param2: u16, data: &[u8]) -> Result<Vec<u8>> {
    if !opcode.payload_sizes().contains(&data.len()) {
        return Err(Error::BadParameters("payload size not valid for opcode"));
    }

    let count = FRAME_OVERHEAD + data.len();
    let mut frame = Vec::with_capacity(count);
    frame.push(count as u8);
    frame.push(opcode as u8);
    frame.push(param1);
    frame.extend_from_slice(&param2.to_le_bytes());
    frame.extend_from_slice(data);

    let crc = crc16(&frame, 0);
    frame.extend_from_slice(&crc.to_le_bytes());
    Ok(frame)
}

/// Split a serialized command frame back into its fields. Used by the
/// emulated device and by the frame round-trip tests.
pub fn parse_frame(raw: &[u8]) -> Result<(u8, u8, u16, Vec<u8>)> {
    if raw.len() < FRAME_OVERHEAD || raw[0] as usize != raw.len() {
        return Err(Error::MalformedResponse);
    }
    let body = &raw[..raw.len() - 2];
    let wire_crc = u16::from_le_bytes([raw[raw.len() - 2], raw[raw.len() - 1]]);
    if crc16(body, 0) != wire_crc {
        return Err(Error::CrcMismatch);
    }
    let param2 = u16::from_le_bytes([raw[3], raw[4]]);
    Ok((raw[1], raw[2], param2, raw[5..raw.len() - 2].to_vec()))
}

/// Validate a response frame and return its payload.
///
/// Responses are `[count][payload...][crc LE]`; the payload is not
/// trusted before the CRC checks out. A bare status byte (some I/O
/// paths deliver it without framing) is passed through as-is.
pub fn parse_response(raw: &[u8]) -> Result<Vec<u8>> {
    if raw.len() == 1 {
        return Ok(raw.to_vec());
    }
    if raw.len() < 4 {
        return Err(Error::MalformedResponse);
    }
    let count = raw[0] as usize;
    if count < 4 || count > raw.len() {
        return Err(Error::MalformedResponse);
    }
    let wire_crc = u16::from_le_bytes([raw[count - 2], raw[count - 1]]);
    if crc16(&raw[..count - 2], 0) != wire_crc {
        return Err(Error::CrcMismatch);
    }
    Ok(raw[1..count - 2].to_vec())
}

/// Issue one command and return its response payload.
///
/// `resp_len` is the payload size a successful execution produces
/// (1 for status-only commands). The device may answer any command
/// with a status frame instead; such a status is translated into the
/// error taxonomy here, exactly once.
///
/// Nothing is retried: commands that mutate non-volatile memory are
/// not idempotent after an ambiguous response, so retry is always a
/// caller decision.
pub(crate) async fn execute(
    transport: &mut dyn Transport,
    opcode: Opcode,
    param1: u8,
    param2: u16,
    data: &[u8],
    resp_len: usize,
) -> Result<Vec<u8>> {
    let frame = build_frame(opcode, param1, param2, data)?;
    trace!("[TX] {:?} {}", opcode, hex::encode(&frame));
    transport.send(&frame).await?;

    tokio::time::sleep(opcode.exec_time()).await;

    let raw = transport
        .receive(resp_len + 3, RESPONSE_TIMEOUT)
        .await
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => Error::Timeout,
            _ => Error::Io(e),
        })?;
    if raw.is_empty() {
        return Err(Error::Timeout);
    }
    trace!("[RX] {:?} {}", opcode, hex::encode(&raw));

    let payload = parse_response(&raw)?;
    if payload.len() == 1 {
        let status = Status::from_byte(payload[0]).ok_or(Error::MalformedResponse)?;
        Error::from_status(status)?;
        if resp_len == 1 {
            return Ok(payload);
        }
        debug!("{:?}: status Ok but {} payload bytes expected", opcode, resp_len);
        return Err(Error::MalformedResponse);
    }
    if payload.len() != resp_len {
        return Err(Error::MalformedResponse);
    }
    Ok(payload)
}

/// Wake the device and consume its Ready acknowledgement
/// (`04 11 33 43`). Starts the watchdog window.
pub(crate) async fn wake(transport: &mut dyn Transport) -> Result<()> {
    transport.wake().await?;
    let raw = transport.receive(4, RESPONSE_TIMEOUT).await?;
    let payload = parse_response(&raw).map_err(|_| Error::WakeFailed)?;
    match payload.first().and_then(|b| Status::from_byte(*b)) {
        Some(Status::Ready) => Ok(()),
        _ => Err(Error::WakeFailed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_round_trip() {
        let data = [0xaa; 20];
        let frame = build_frame(Opcode::Nonce, 0x00, 0x0000, &data).unwrap();
        assert_eq!(frame[0] as usize, frame.len());

        let (op, p1, p2, payload) = parse_frame(&frame).unwrap();
        assert_eq!(op, Opcode::Nonce as u8);
        assert_eq!(p1, 0x00);
        assert_eq!(p2, 0x0000);
        assert_eq!(payload, data);
    }

    #[test]
    fn bad_payload_size_rejected_before_framing() {
        assert!(matches!(
            build_frame(Opcode::Random, 0, 0, &[0u8; 4]),
            Err(Error::BadParameters(_))
        ));
        assert!(matches!(
            build_frame(Opcode::Nonce, 0, 0, &[0u8; 21]),
            Err(Error::BadParameters(_))
        ));
    }

    #[test]
    fn corrupted_frame_fails_crc() {
        let frame = build_frame(Opcode::Read, 0x00, 0x0015, &[]).unwrap();
        for i in 0..frame.len() - 2 {
            for bit in 0..8 {
                let mut bad = frame.clone();
                bad[i] ^= 1 << bit;
                assert!(parse_frame(&bad).is_err(), "flip at byte {i} bit {bit}");
            }
        }
    }

    #[test]
    fn response_payload_extracted_after_crc_check() {
        let mut resp = vec![7u8, 0x11, 0x22, 0x33, 0x44];
        let crc = crc16(&resp, 0);
        resp.extend_from_slice(&crc.to_le_bytes());
        assert_eq!(parse_response(&resp).unwrap(), vec![0x11, 0x22, 0x33, 0x44]);

        resp[2] ^= 0x01;
        assert!(matches!(parse_response(&resp), Err(Error::CrcMismatch)));
    }

    #[test]
    fn wake_token_parses_as_ready() {
        let payload = parse_response(&[0x04, 0x11, 0x33, 0x43]).unwrap();
        assert_eq!(Status::from_byte(payload[0]), Some(Status::Ready));
    }

    #[test]
    fn status_bytes_match_wire_values() {
        assert_eq!(Status::Ok as u8, 0x00);
        assert_eq!(Status::CheckMacFail as u8, 0x01);
        assert_eq!(Status::ExecError as u8, 0x0f);
        assert_eq!(Status::Ready as u8, 0x11);
        assert_eq!(Status::PaddingError as u8, 0x98);
        assert_eq!(Status::BadParameters as u8, 0x99);
        assert_eq!(Status::from_byte(0x42), None);
    }
}
