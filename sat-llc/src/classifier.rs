//! Mapping of the IP Type-of-Service byte onto data flows.

use crate::protocol::FlowId;

/// Expedited forwarding.
pub const DSCP_EF: u8 = 46;

/// Differentiated services code point carried in the upper six bits of `tos`.
pub fn dscp(tos: u8) -> u8 {
    tos >> 2
}

fn is_assured_forwarding(dscp: u8) -> bool {
    // AF11..AF43: class in bits 5..3, drop precedence 1..=3 in bits 2..1.
    let class = dscp >> 3;
    let drop = (dscp >> 1) & 0x3;
    (1..=4).contains(&class) && drop != 0 && dscp & 1 == 0
}

fn is_class_selector(dscp: u8) -> bool {
    dscp & 0x7 == 0 && dscp != 0
}

/// Picks the data flow for a packet with the given ToS byte.
///
/// Expedited forwarding goes to flow 1, assured forwarding and class selectors to
/// flow 2, and best effort to the last data flow. The result always lies within
/// `1..num_flows`.
pub fn classify(tos: u8, num_flows: u8) -> FlowId {
    let last = num_flows.saturating_sub(1).max(1);
    let d = dscp(tos);
    let flow = if d == DSCP_EF {
        1
    } else if is_assured_forwarding(d) || is_class_selector(d) {
        2
    } else {
        last
    };
    FlowId(flow.clamp(1, last))
}
