//! Dot-segmented wildcard matching.
//!
//! Patterns and message types are both sequences of `.`-separated
//! segments. A pattern matches a type iff both have the same number of
//! segments and each pattern segment is either the wildcard `*` or equal
//! to the corresponding type segment. `order.*` matches `order.created`
//! but neither `order.created.v2` nor `payment.received`.

/// The single-segment wildcard token.
pub const WILDCARD: &str = "*";

/// Returns whether `pattern` matches `message_type`.
///
/// Matching is case-sensitive and requires an exact segment count. This is
/// a pure function; it is used by the broker's pub/sub fan-out, the bus's
/// handler selection, and stream handler attachment by pattern.
pub fn matches(pattern: &str, message_type: &str) -> bool {
    let mut pattern_segments = pattern.split('.');
    let mut type_segments = message_type.split('.');
    loop {
        match (pattern_segments.next(), type_segments.next()) {
            (Some(p), Some(t)) => {
                if p != WILDCARD && p != t {
                    return false;
                }
            }
            (None, None) => return true,
            _ => return false,
        }
    }
}
