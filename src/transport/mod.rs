/*
    SPDX-License-Identifier: Apache-2.0
    SPDX-FileCopyrightText: 2026 sha204 contributors
*/
pub mod emulated;
pub use emulated::EmulatedDevice;

use std::time::Duration;

/// Byte-level transport to the device.
///
/// The core depends only on this contract; bus specifics (I2C word
/// addressing, SWI bit encoding, wake pulse generation) live in the
/// implementation. Any transport satisfying it is interchangeable.
///
/// Violating the contract (e.g. returning garbage from `receive`
/// without an error) is a caller bug, not something the core defends
/// against beyond its CRC checks.
#[async_trait::async_trait]
pub trait Transport: Send + std::fmt::Debug {
    /// Transmit one serialized command frame.
    async fn send(&mut self, buf: &[u8]) -> std::io::Result<()>;

    /// Read up to `max_len` response bytes, waiting at most `timeout`.
    /// An elapsed timeout reports `ErrorKind::TimedOut`.
    async fn receive(&mut self, max_len: usize, timeout: Duration) -> std::io::Result<Vec<u8>>;

    /// Generate the device wake sequence. The Ready acknowledgement is
    /// read by the protocol layer through `receive`.
    async fn wake(&mut self) -> std::io::Result<()>;
}
