//! Outbound byte transport

use super::EspError;

/// Sends bytes to the module
///
/// Implementations must not block indefinitely; a serial write should carry a
/// timeout and report expiry as [`EspError::Transport`].
pub trait Transmit: Send {
    /// Write all of `bytes`
    fn transmit(&mut self, bytes: &[u8]) -> Result<(), EspError>;
}

impl<F> Transmit for F
where
    F: FnMut(&[u8]) -> Result<(), EspError> + Send,
{
    fn transmit(&mut self, bytes: &[u8]) -> Result<(), EspError> {
        self(bytes)
    }
}
