use crate::ZmqError;

// Use values consistent with libzmq where possible
pub const RCVMORE: i32 = 13;
pub const FD: i32 = 14;
pub const EVENTS: i32 = 15;
pub const SNDHWM: i32 = 23;
pub const RCVHWM: i32 = 24;
pub const IPV6: i32 = 42;

/// libzmq's default high-water mark, in messages.
pub const DEFAULT_HWM: usize = 1000;

/// Parsed per-socket settings for the in-process transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InprocOptions {
  /// Maximum number of whole messages queued towards the peer.
  pub sndhwm: usize,
  /// Maximum number of whole messages queued for this socket to receive.
  pub rcvhwm: usize,
}

impl Default for InprocOptions {
  fn default() -> Self {
    Self {
      sndhwm: DEFAULT_HWM,
      rcvhwm: DEFAULT_HWM,
    }
  }
}

impl InprocOptions {
  /// Applies a raw `setsockopt`-style value.
  pub fn set(&mut self, option: i32, value: &[u8]) -> Result<(), ZmqError> {
    match option {
      SNDHWM => self.sndhwm = parse_hwm_option(value, option)?,
      RCVHWM => self.rcvhwm = parse_hwm_option(value, option)?,
      _ => return Err(ZmqError::InvalidOption(option)),
    }
    Ok(())
  }

  /// Reads back a value as native-endian `i32` bytes.
  pub fn get(&self, option: i32) -> Result<Vec<u8>, ZmqError> {
    let value = match option {
      SNDHWM => hwm_to_i32(self.sndhwm),
      RCVHWM => hwm_to_i32(self.rcvhwm),
      _ => return Err(ZmqError::InvalidOption(option)),
    };
    Ok(value.to_ne_bytes().to_vec())
  }
}

// 0 means "no limit" on the wire, usize::MAX internally.
fn hwm_to_i32(hwm: usize) -> i32 {
  if hwm == usize::MAX {
    0
  } else {
    i32::try_from(hwm).unwrap_or(i32::MAX)
  }
}

// --- Helper functions for parsing option values ---

/// Parses a byte slice representing an integer option.
pub(crate) fn parse_i32_option(value: &[u8]) -> Result<i32, ZmqError> {
  let arr: [u8; 4] = value.try_into().map_err(|_| ZmqError::InvalidOptionValue(0))?;

  Ok(i32::from_ne_bytes(arr)) // Native endianness, as in the libzmq C API
}

/// Parses a byte slice representing a boolean option (0 or 1).
pub(crate) fn parse_bool_option(value: &[u8]) -> Result<bool, ZmqError> {
  Ok(parse_i32_option(value)? == 1)
}

/// Parses a high-water mark. 0 disables the limit, negatives are rejected.
pub(crate) fn parse_hwm_option(value: &[u8], option_id: i32) -> Result<usize, ZmqError> {
  let val = parse_i32_option(value).map_err(|_| ZmqError::InvalidOptionValue(option_id))?;
  match val {
    0 => Ok(usize::MAX),
    1.. => Ok(val as usize),
    _ => Err(ZmqError::InvalidOptionValue(option_id)),
  }
}
