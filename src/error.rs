use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
#[non_exhaustive] // Allows adding more variants later without breaking change
pub enum ZmqError {
  // --- I/O Errors ---
  #[error("I/O error: {0}")]
  Io(#[from] io::Error), // Allows easy conversion from std::io::Error

  #[error("Invalid argument provided: {0}")]
  InvalidArgument(String),

  // --- Registration Errors ---
  #[error("Invalid callback combination: {0}")]
  InvalidCallbacks(&'static str),
  #[error("Socket introspection failed for option {option}: {source}")]
  Introspection {
    option: i32,
    #[source]
    source: Box<ZmqError>,
  },

  // --- Option Errors ---
  #[error("Invalid socket option ID: {0}")]
  InvalidOption(i32), // EINVAL
  #[error("Invalid value provided for option ID {0}")]
  InvalidOptionValue(i32), // EINVAL

  // --- State Errors ---
  #[error("Operation is invalid for the current state: {0}")]
  InvalidState(&'static str), // EFSM
  #[error("Messaging context has been terminated")]
  ContextTerminated, // ETERM
  #[error("Connection closed by peer")]
  ConnectionClosed,

  // --- Resource Limits ---
  #[error("Resource limit reached (e.g., HWM)")]
  ResourceLimitReached, // EAGAIN / EWOULDBLOCK equivalent

  // --- Internal Errors ---
  #[error("Internal library error: {0}")]
  Internal(String),
}

impl ZmqError {
  /// Wraps a failed socket query made while registering a direction.
  pub fn introspection(option: i32, source: ZmqError) -> Self {
    ZmqError::Introspection {
      option,
      source: Box::new(source),
    }
  }

  /// True for errors raised synchronously by registration that the caller
  /// has to fix before calling again.
  pub fn is_configuration(&self) -> bool {
    matches!(self, ZmqError::InvalidCallbacks(_) | ZmqError::Introspection { .. })
  }

  /// True for the EAGAIN equivalent.
  pub fn is_would_block(&self) -> bool {
    match self {
      ZmqError::ResourceLimitReached => true,
      ZmqError::Io(e) => e.kind() == io::ErrorKind::WouldBlock,
      _ => false,
    }
  }
}
