//! Channel and group name rules, and allocation of fresh channel names.
//!
//! Channel names: `[A-Za-z0-9._-]+`, optionally followed by `!` and a
//! process-local suffix of word characters, dots and dashes. Group names:
//! `[A-Za-z0-9._-]+`. Both must be shorter than [`MAX_NAME_LENGTH`].

use rand::distr::Alphanumeric;
use rand::Rng;

use crate::error::LayerError;
use crate::types::Message;

pub const MAX_NAME_LENGTH: usize = 100;

/// Marks the start of the process-local part of a channel name.
pub const LOCAL_MARKER: char = '!';

/// Placed between the caller's prefix and the random suffix.
pub const ALLOCATED_INFIX: &str = ".zmq!";

pub const SUFFIX_LEN: usize = 12;

/// Messages must not carry this key; it is reserved for routing metadata.
pub const RESERVED_MESSAGE_KEY: &str = "__asgi_channel__";

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')
}

fn is_local_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '-' | '_' | '.')
}

fn within_length(name: &str) -> bool {
    name.chars().count() < MAX_NAME_LENGTH
}

pub fn is_valid_group_name(name: &str) -> bool {
    within_length(name) && !name.is_empty() && name.chars().all(is_name_char)
}

pub fn is_valid_channel_name(name: &str) -> bool {
    if !within_length(name) {
        return false;
    }
    let (head, local) = match name.split_once(LOCAL_MARKER) {
        Some((head, local)) => (head, local),
        None => (name, ""),
    };
    !head.is_empty() && head.chars().all(is_name_char) && local.chars().all(is_local_char)
}

pub fn validate_channel_name(name: &str) -> Result<(), LayerError> {
    if is_valid_channel_name(name) {
        Ok(())
    } else {
        Err(LayerError::InvalidChannelName(name.to_string()))
    }
}

pub fn validate_group_name(name: &str) -> Result<(), LayerError> {
    if is_valid_group_name(name) {
        Ok(())
    } else {
        Err(LayerError::InvalidGroupName(name.to_string()))
    }
}

pub fn validate_message(message: &Message) -> Result<(), LayerError> {
    if message.contains_key(RESERVED_MESSAGE_KEY) {
        return Err(LayerError::InvalidMessage(format!(
            "reserved key {RESERVED_MESSAGE_KEY} present"
        )));
    }
    Ok(())
}

/// Random alphanumeric suffix for a freshly allocated channel.
pub fn random_suffix() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(SUFFIX_LEN)
        .map(char::from)
        .collect()
}

pub fn allocated_name(prefix: &str, suffix: &str) -> String {
    format!("{prefix}{ALLOCATED_INFIX}{suffix}")
}
