//! Channel naming: the live list and its dead-letter sibling.

/// Appended to a queue name to get its dead-letter channel.
pub const DEAD_LETTER_SUFFIX: &str = ":dead";

/// Store keys for one queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channels {
    pub live: String,
    pub dead: String,
}

impl Channels {
    pub fn for_queue(name: &str) -> Self {
        Self {
            live: name.to_string(),
            dead: format!("{name}{DEAD_LETTER_SUFFIX}"),
        }
    }
}
