use bitflags::bitflags;

bitflags! {
    /// Per-frame flags. Only the continuation bit exists on the receive path.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct MsgFlags: u8 {
        /// Another part of the same message follows this frame.
        const MORE = 0b01;
    }
}
