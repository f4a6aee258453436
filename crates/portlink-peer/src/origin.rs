//! Origin restrictions and the guard applied to handshake initiations.

use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

use portlink_transport::{ContextId, EmbeddedFrame, WindowMessage, WILDCARD_ORIGIN};

/// Origin restriction for the peer context.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub enum TargetOrigin {
    /// No restriction configured.
    #[default]
    Unrestricted,
    /// Explicit wildcard (`*`).
    Any,
    /// Only this exact origin.
    Exact(String),
}

impl TargetOrigin {
    /// Parse a configured value; `*` is the wildcard, anything else is exact.
    pub fn parse(value: &str) -> Self {
        if value == WILDCARD_ORIGIN {
            Self::Any
        } else {
            Self::Exact(value.to_string())
        }
    }

    /// Whether a message reporting `origin` satisfies the restriction.
    pub fn allows(&self, origin: &str) -> bool {
        match self {
            Self::Unrestricted | Self::Any => true,
            Self::Exact(expected) => expected == origin,
        }
    }

    /// Value to pass as the target origin when posting to the peer's window.
    pub fn post_target(&self) -> &str {
        match self {
            Self::Unrestricted | Self::Any => WILDCARD_ORIGIN,
            Self::Exact(origin) => origin,
        }
    }
}

impl FromStr for TargetOrigin {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

impl From<&str> for TargetOrigin {
    fn from(value: &str) -> Self {
        Self::parse(value)
    }
}

impl From<String> for TargetOrigin {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl fmt::Display for TargetOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unrestricted => f.write_str("(none)"),
            Self::Any => f.write_str(WILDCARD_ORIGIN),
            Self::Exact(origin) => f.write_str(origin),
        }
    }
}

/// Why a window message failed the guard.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GuardRejection {
    #[error("frame has no content window")]
    NoContentWindow,

    #[error("source {actual} is not the frame's content window {expected}")]
    ForeignSource {
        expected: ContextId,
        actual: ContextId,
    },

    #[error("origin {actual:?} does not match target origin {expected:?}")]
    OriginMismatch { expected: String, actual: String },
}

/// Check that `msg` was posted by the context loaded in `frame` and that its
/// origin satisfies `target`.
pub fn validate(
    frame: &dyn EmbeddedFrame,
    target: &TargetOrigin,
    msg: &WindowMessage,
) -> Result<(), GuardRejection> {
    let expected = frame
        .content_window()
        .ok_or(GuardRejection::NoContentWindow)?;
    if msg.source != expected {
        return Err(GuardRejection::ForeignSource {
            expected,
            actual: msg.source,
        });
    }

    if !target.allows(&msg.origin) {
        return Err(GuardRejection::OriginMismatch {
            expected: target.to_string(),
            actual: msg.origin.clone(),
        });
    }
    Ok(())
}
