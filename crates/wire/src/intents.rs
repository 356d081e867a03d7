//! Gateway intents bitmask.
//!
//! Intents tell the gateway which event groups a connection wants. They are
//! validated once, when the configuration is built — a typo'd bit fails
//! `GatewayConfigBuilder::build()` instead of getting the socket closed with
//! 4013 halfway through startup.

use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign};

use serde::{Deserialize, Serialize};

use crate::error::WireError;

/// Fixed-width intents bitmask with named bit constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Intents(u64);

impl Intents {
    pub const GUILDS: Intents = Intents(1 << 0);
    pub const GUILD_MEMBERS: Intents = Intents(1 << 1);
    pub const GUILD_MODERATION: Intents = Intents(1 << 2);
    pub const GUILD_EXPRESSIONS: Intents = Intents(1 << 3);
    pub const GUILD_INTEGRATIONS: Intents = Intents(1 << 4);
    pub const GUILD_WEBHOOKS: Intents = Intents(1 << 5);
    pub const GUILD_INVITES: Intents = Intents(1 << 6);
    pub const GUILD_VOICE_STATES: Intents = Intents(1 << 7);
    pub const GUILD_PRESENCES: Intents = Intents(1 << 8);
    pub const GUILD_MESSAGES: Intents = Intents(1 << 9);
    pub const GUILD_MESSAGE_REACTIONS: Intents = Intents(1 << 10);
    pub const GUILD_MESSAGE_TYPING: Intents = Intents(1 << 11);
    pub const DIRECT_MESSAGES: Intents = Intents(1 << 12);
    pub const DIRECT_MESSAGE_REACTIONS: Intents = Intents(1 << 13);
    pub const DIRECT_MESSAGE_TYPING: Intents = Intents(1 << 14);
    pub const MESSAGE_CONTENT: Intents = Intents(1 << 15);
    pub const GUILD_SCHEDULED_EVENTS: Intents = Intents(1 << 16);
    pub const AUTO_MODERATION_CONFIGURATION: Intents = Intents(1 << 20);
    pub const AUTO_MODERATION_EXECUTION: Intents = Intents(1 << 21);
    pub const GUILD_MESSAGE_POLLS: Intents = Intents(1 << 24);
    pub const DIRECT_MESSAGE_POLLS: Intents = Intents(1 << 25);

    /// Mask of every bit the gateway currently defines.
    const KNOWN: u64 = (1 << 0)
        | (1 << 1)
        | (1 << 2)
        | (1 << 3)
        | (1 << 4)
        | (1 << 5)
        | (1 << 6)
        | (1 << 7)
        | (1 << 8)
        | (1 << 9)
        | (1 << 10)
        | (1 << 11)
        | (1 << 12)
        | (1 << 13)
        | (1 << 14)
        | (1 << 15)
        | (1 << 16)
        | (1 << 20)
        | (1 << 21)
        | (1 << 24)
        | (1 << 25);

    pub const fn none() -> Intents {
        Intents(0)
    }

    pub const fn all() -> Intents {
        Intents(Self::KNOWN)
    }

    pub const fn from_bits(bits: u64) -> Intents {
        Intents(bits)
    }

    pub const fn bits(self) -> u64 {
        self.0
    }

    pub const fn contains(self, other: Intents) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Reject bitmasks containing bits the gateway does not define.
    pub fn validate(self) -> Result<(), WireError> {
        let unknown = self.0 & !Self::KNOWN;
        if unknown != 0 {
            return Err(WireError::UnknownIntents { bits: unknown });
        }
        Ok(())
    }
}

impl BitOr for Intents {
    type Output = Intents;
    fn bitor(self, rhs: Intents) -> Intents {
        Intents(self.0 | rhs.0)
    }
}

impl BitOrAssign for Intents {
    fn bitor_assign(&mut self, rhs: Intents) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for Intents {
    type Output = Intents;
    fn bitand(self, rhs: Intents) -> Intents {
        Intents(self.0 & rhs.0)
    }
}

impl fmt::Display for Intents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_bits_validate() {
        assert!(Intents::all().validate().is_ok());
        assert!((Intents::GUILDS | Intents::MESSAGE_CONTENT).validate().is_ok());
        assert!(Intents::none().validate().is_ok());
    }

    #[test]
    fn unknown_bits_rejected() {
        let bogus = Intents::from_bits(1 << 40);
        match bogus.validate() {
            Err(WireError::UnknownIntents { bits }) => assert_eq!(bits, 1 << 40),
            other => panic!("expected UnknownIntents, got {other:?}"),
        }
        // A valid bit mixed with an invalid one still fails.
        assert!((Intents::GUILDS | Intents::from_bits(1 << 63)).validate().is_err());
    }

    #[test]
    fn contains_and_ops() {
        let i = Intents::GUILDS | Intents::GUILD_MESSAGES;
        assert!(i.contains(Intents::GUILDS));
        assert!(!i.contains(Intents::GUILD_PRESENCES));
        assert_eq!((i & Intents::GUILDS).bits(), Intents::GUILDS.bits());
    }

    #[test]
    fn serializes_as_plain_integer() {
        let i = Intents::GUILDS | Intents::GUILD_MESSAGES;
        assert_eq!(serde_json::to_string(&i).unwrap(), "513");
    }
}
