use crate::error::ZmqError;
use crate::message::Msg;

use bitflags::bitflags;
use std::os::fd::RawFd;

bitflags! {
    /// Readiness bits reported by `BridgeSocket::events` and `BridgeSocket::poll`.
    /// Values match libzmq's `ZMQ_POLLIN`/`ZMQ_POLLOUT`/`ZMQ_POLLERR`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PollEvents: i16 {
        /// At least one message part can be received without blocking.
        const POLLIN = 1;
        /// At least one message can be sent without blocking.
        const POLLOUT = 2;
        /// The socket is in an error state.
        const POLLERR = 4;
    }
}

bitflags! {
    /// Flags for `recv_part`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct RecvFlags: i32 {
        /// Fail with `ZmqError::ResourceLimitReached` instead of blocking.
        const DONTWAIT = 1;
    }
}

bitflags! {
    /// Flags for sending a message part.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct SendFlags: i32 {
        /// Fail with `ZmqError::ResourceLimitReached` instead of blocking.
        const DONTWAIT = 1;
        /// More parts of the same message follow.
        const MORE = 2;
    }
}

/// The subset of a ZeroMQ socket the bridge drives.
///
/// Implementations expose one notification descriptor (`fd`) that becomes
/// readable whenever *either* direction's readiness may have changed. The
/// descriptor is edge-triggered: after it fires, the true state must be read
/// back through `events`/`poll`, and doing so consumes the pending notification.
pub trait BridgeSocket {
  /// The notification descriptor (`ZMQ_FD`).
  fn fd(&self) -> Result<RawFd, ZmqError>;

  /// Current readiness (`ZMQ_EVENTS`).
  fn events(&self) -> Result<PollEvents, ZmqError>;

  /// Zero-timeout poll of this socket for `interest`.
  fn poll(&self, interest: PollEvents) -> Result<PollEvents, ZmqError> {
    Ok(self.events()? & interest)
  }

  /// Receives one message part into `msg`.
  ///
  /// With `RecvFlags::DONTWAIT`, returns `ZmqError::ResourceLimitReached`
  /// when no part is available.
  fn recv_part(&self, msg: &mut Msg, flags: RecvFlags) -> Result<(), ZmqError>;

  /// Whether more parts of the message currently being received are pending
  /// (`ZMQ_RCVMORE`).
  fn rcvmore(&self) -> Result<bool, ZmqError>;
}
