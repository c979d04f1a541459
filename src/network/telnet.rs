//! In-band Telnet control for target connections.

use crate::bridge::{ServerControl, WindowSize};
use crate::error_handling::types::BridgeError;

pub const IAC: u8 = 0xff;
pub const NOP: u8 = 0xf1;
pub const SB: u8 = 0xfa;
pub const SE: u8 = 0xf0;
/// Negotiate About Window Size, RFC 1073.
pub const NAWS: u8 = 31;

/// Keepalives as `IAC NOP`, window changes as NAWS subnegotiations.
#[derive(Debug, Default, Clone, Copy)]
pub struct TelnetControl;

impl ServerControl for TelnetControl {
    fn resize(&self, size: WindowSize) -> Result<Option<Vec<u8>>, BridgeError> {
        Ok(Some(naws(size)))
    }

    fn keepalive(&self) -> Result<Option<Vec<u8>>, BridgeError> {
        Ok(Some(vec![IAC, NOP]))
    }
}

fn naws(size: WindowSize) -> Vec<u8> {
    let mut out = vec![IAC, SB, NAWS];
    for byte in size.width.to_be_bytes().into_iter().chain(size.height.to_be_bytes()) {
        out.push(byte);
        // a literal 255 inside a subnegotiation is doubled
        if byte == IAC {
            out.push(IAC);
        }
    }
    out.extend_from_slice(&[IAC, SE]);
    out
}
