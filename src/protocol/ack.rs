//! Acknowledgement types.
//!
//! Every request carries an `AckPolicy` telling the broker when to answer,
//! and every answer is an `AckResponse` correlated by the request's `uid`.

use std::fmt;

use crate::utils::{FrameError, RegistryError};

/// When the broker should acknowledge a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[non_exhaustive]
pub enum AckPolicy {
    /// Acknowledge once the broker accepted the message, before delivery.
    #[default]
    OnSent,
    /// Acknowledge after fan-out to every subscriber has been attempted.
    OnDelivered,
}

impl AckPolicy {
    pub fn code(self) -> u8 {
        match self {
            AckPolicy::OnSent => 1,
            AckPolicy::OnDelivered => 2,
        }
    }

    pub fn from_code(code: u8) -> Result<Self, FrameError> {
        match code {
            1 => Ok(AckPolicy::OnSent),
            2 => Ok(AckPolicy::OnDelivered),
            other => Err(FrameError::UnknownAckPolicy(other)),
        }
    }
}

/// Why the broker refused a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    Registry(RegistryError),
    Invalid(String),
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::Registry(e) => write!(f, "{e}"),
            Rejection::Invalid(reason) => write!(f, "invalid request: {reason}"),
        }
    }
}

impl From<RegistryError> for Rejection {
    fn from(err: RegistryError) -> Self {
        Rejection::Registry(err)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckStatus {
    Accepted,
    Delivered { delivered: u16, failed: u16 },
    Rejected(Rejection),
}

impl AckStatus {
    pub fn is_positive(&self) -> bool {
        !matches!(self, AckStatus::Rejected(_))
    }
}

/// The acknowledgement returned for a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckResponse {
    /// Correlation id of the acknowledged request.
    pub uid: String,
    pub ack: AckStatus,
}

impl AckResponse {
    pub fn accepted(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            ack: AckStatus::Accepted,
        }
    }

    pub fn delivered(uid: impl Into<String>, delivered: usize, failed: usize) -> Self {
        Self {
            uid: uid.into(),
            ack: AckStatus::Delivered {
                delivered: saturate(delivered),
                failed: saturate(failed),
            },
        }
    }

    pub fn rejected(uid: impl Into<String>, rejection: impl Into<Rejection>) -> Self {
        Self {
            uid: uid.into(),
            ack: AckStatus::Rejected(rejection.into()),
        }
    }
}

fn saturate(n: usize) -> u16 {
    u16::try_from(n).unwrap_or(u16::MAX)
}
