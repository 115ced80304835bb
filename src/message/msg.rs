use crate::message::flags::MsgFlags;
use bytes::Bytes;
use std::fmt;

/// One frame of a (possibly multi-part) message.
///
/// The read drain allocates a single `Msg` per multi-part message and hands it
/// to `BridgeSocket::recv_part` for every part; the socket replaces payload
/// and flags each time, so the buffer seen by a part callback is only valid
/// for the duration of that call.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Msg {
  // Reference counted, so handing frames between pair ends never copies.
  data: Option<Bytes>,
  flags: MsgFlags,
}

impl Msg {
  /// An empty frame, used as a receive buffer.
  pub fn new() -> Self {
    Self::default()
  }

  pub fn from_vec(data: Vec<u8>) -> Self {
    Self::from_bytes(Bytes::from(data))
  }

  pub fn from_bytes(data: Bytes) -> Self {
    Self {
      data: Some(data),
      flags: MsgFlags::empty(),
    }
  }

  pub fn from_static(data: &'static [u8]) -> Self {
    Self::from_bytes(Bytes::from_static(data))
  }

  /// The payload, or `None` for a frame that has never been filled.
  pub fn data(&self) -> Option<&[u8]> {
    self.data.as_deref()
  }

  /// Payload length in bytes.
  pub fn size(&self) -> usize {
    self.data.as_ref().map_or(0, Bytes::len)
  }

  pub fn flags(&self) -> MsgFlags {
    self.flags
  }

  pub fn set_flags(&mut self, flags: MsgFlags) {
    self.flags = flags;
  }

  /// Whether further parts of the same message follow this frame.
  pub fn is_more(&self) -> bool {
    self.flags.contains(MsgFlags::MORE)
  }

  /// Replaces payload and flags with those of `other`, reusing this buffer.
  pub(crate) fn overwrite(&mut self, other: Msg) {
    *self = other;
  }
}

impl fmt::Debug for Msg {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    // Payloads can be large; only their length is printed.
    f.debug_struct("Msg")
      .field("size", &self.size())
      .field("more", &self.is_more())
      .finish()
  }
}
