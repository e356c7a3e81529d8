//! Logical channel tags.
//!
//! Every message travels under a non-negative integer tag that identifies a
//! logical channel, so independent streams can be multiplexed over one
//! transport. The runtime reserves a contiguous block of values for its
//! control channels; application tags must stay below [`Tag::RESERVED_BASE`].

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// A non-negative integer identifying a logical message channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tag(i32);

impl Tag {
    /// First value of the block reserved for runtime control channels.
    ///
    /// Application tags created through [`Tag::user`] are always below this.
    pub const RESERVED_BASE: i32 = 1 << 20;

    /// Worker to controller: "I am free." Payload is the worker's own rank.
    pub const REQUEST_WORK: Tag = Tag(Self::RESERVED_BASE);

    /// Controller to worker: a single integer, `1` = work follows,
    /// `0` = terminate.
    pub const DATA_AVAILABLE: Tag = Tag(Self::RESERVED_BASE + 1);

    /// Length prefix preceding any framed payload.
    pub const MESSAGE_LENGTH: Tag = Tag(Self::RESERVED_BASE + 2);

    /// Framed payload carrying a work item.
    pub const MESSAGE_DATA: Tag = Tag(Self::RESERVED_BASE + 3);

    /// Framed payload carrying a result.
    pub const MESSAGE_RESULT: Tag = Tag(Self::RESERVED_BASE + 4);

    /// Framed payload carrying the error companion of a result.
    pub const MESSAGE_ERROR: Tag = Tag(Self::RESERVED_BASE + 5);

    /// Transport-internal: barrier coordination messages.
    pub const BARRIER: Tag = Tag(Self::RESERVED_BASE + 6);

    /// Create an application tag.
    ///
    /// Rejects negative values and values inside the reserved block.
    pub fn user(value: i32) -> Result<Tag, Error> {
        if value < 0 {
            return Err(Error::InvalidTag(format!("tag must be non-negative, got {value}")));
        }
        if value >= Self::RESERVED_BASE {
            return Err(Error::InvalidTag(format!(
                "tag {value} collides with the reserved block starting at {}",
                Self::RESERVED_BASE
            )));
        }
        Ok(Tag(value))
    }

    /// Reconstruct a tag from its wire value.
    ///
    /// Accepts both application and reserved values; only negatives are
    /// rejected.
    pub fn from_raw(value: i32) -> Result<Tag, Error> {
        if value < 0 {
            return Err(Error::InvalidTag(format!("tag must be non-negative, got {value}")));
        }
        Ok(Tag(value))
    }

    /// The raw integer value of this tag.
    pub fn value(self) -> i32 {
        self.0
    }

    /// Whether this tag belongs to the runtime's reserved block.
    pub fn is_reserved(self) -> bool {
        self.0 >= Self::RESERVED_BASE
    }
}

impl std::fmt::Display for Tag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Tag::REQUEST_WORK => write!(f, "RequestWork"),
            Tag::DATA_AVAILABLE => write!(f, "DataAvailable"),
            Tag::MESSAGE_LENGTH => write!(f, "MessageLength"),
            Tag::MESSAGE_DATA => write!(f, "MessageData"),
            Tag::MESSAGE_RESULT => write!(f, "MessageResult"),
            Tag::MESSAGE_ERROR => write!(f, "MessageError"),
            Tag::BARRIER => write!(f, "Barrier"),
            Tag(v) => write!(f, "Tag({v})"),
        }
    }
}
