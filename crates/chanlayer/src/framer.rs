//! The wire convention: one text frame per message, `"<group>|<json>"`.
//!
//! Many groups share one publish socket; the group tag in front of the
//! payload is what subscribers filter on. The payload is passed through
//! untouched and may itself contain `|`.

/// Separates the group tag from the payload.
pub const DELIMITER: char = '|';

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("frame has no '{DELIMITER}' delimiter")]
    MissingDelimiter,
}

/// Build a frame.
///
/// # Panics
///
/// If `group` contains [`DELIMITER`]. Group names are validated before they
/// get here, so this is a bug in the caller.
pub fn encode(group: &str, payload: &str) -> String {
    assert!(
        !group.contains(DELIMITER),
        "group name {group:?} contains the frame delimiter"
    );
    let mut frame = String::with_capacity(group.len() + 1 + payload.len());
    frame.push_str(group);
    frame.push(DELIMITER);
    frame.push_str(payload);
    frame
}

/// Split a frame into `(group, payload)` at the first delimiter.
pub fn decode(frame: &str) -> Result<(&str, &str), FrameError> {
    frame
        .split_once(DELIMITER)
        .ok_or(FrameError::MissingDelimiter)
}

/// Socket filter that matches exactly the frames of `group`.
///
/// Filters are prefixes, so the trailing delimiter keeps `"chat"` from also
/// matching `"chatter|..."`.
pub fn subscription_prefix(group: &str) -> String {
    let mut prefix = String::with_capacity(group.len() + 1);
    prefix.push_str(group);
    prefix.push(DELIMITER);
    prefix
}
