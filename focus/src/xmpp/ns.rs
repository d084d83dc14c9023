/// XEP-0215: External Service Discovery
pub(crate) const EXTDISCO: &str = "urn:xmpp:extdisco:2";

pub(crate) const JITSI_FOCUS: &str = "http://jitsi.org/protocol/focus";

pub(crate) const JITSI_JITMEET: &str = "http://jitsi.org/jitmeet";

/// The legacy COLIBRI IQ control protocol a focus speaks to a videobridge.
pub(crate) const JITSI_COLIBRI: &str = "http://jitsi.org/protocol/colibri";

pub(crate) const MUC_ADMIN: &str = "http://jabber.org/protocol/muc#admin";

pub(crate) const MUC_OWNER: &str = "http://jabber.org/protocol/muc#owner";

/// XEP-0045 `<x>`/`<item>`/`<status>` presence payload namespace.
pub(crate) const MUC_USER: &str = "http://jabber.org/protocol/muc#user";
