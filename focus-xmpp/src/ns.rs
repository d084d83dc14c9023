//! XML namespace constants for the Jitsi-specific extensions.

pub const JITSI_MEET: &str = "http://jitsi.org/jitmeet";
pub const JITSI_COLIBRI: &str = "http://jitsi.org/protocol/colibri";
pub const JITSI_FOCUS: &str = "http://jitsi.org/protocol/focus";
