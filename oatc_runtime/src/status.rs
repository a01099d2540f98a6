//! Class lifecycle states.

use std::fmt;

/// Where a class is in its lifecycle.
///
/// Variants are ordered: a class only ever moves forward, except that any
/// state may fall to [`ClassStatus::Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(u8)]
pub enum ClassStatus {
    /// Linking or verification failed.
    Error = 0,
    /// Not linked yet.
    #[default]
    NotReady = 1,
    /// Linked: hierarchy, field layout and vtable are known. Not verified.
    Resolved = 2,
    /// Verification soft-failed; the runtime must verify again.
    RetryVerificationAtRuntime = 3,
    Verified = 4,
    Initialized = 5,
}

impl ClassStatus {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => ClassStatus::Error,
            1 => ClassStatus::NotReady,
            2 => ClassStatus::Resolved,
            3 => ClassStatus::RetryVerificationAtRuntime,
            4 => ClassStatus::Verified,
            _ => ClassStatus::Initialized,
        }
    }

    /// Verified at compile time, possibly with soft failures.
    pub fn is_compile_time_verified(self) -> bool {
        self >= ClassStatus::RetryVerificationAtRuntime
    }

    pub fn is_verified(self) -> bool {
        self >= ClassStatus::Verified
    }

    pub fn is_initialized(self) -> bool {
        self == ClassStatus::Initialized
    }

    pub fn is_erroneous(self) -> bool {
        self == ClassStatus::Error
    }

    /// Whether moving from `self` to `next` is allowed.
    pub fn can_transition_to(self, next: ClassStatus) -> bool {
        next == ClassStatus::Error || next > self
    }
}

impl fmt::Display for ClassStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ClassStatus::Error => "error",
            ClassStatus::NotReady => "not-ready",
            ClassStatus::Resolved => "resolved",
            ClassStatus::RetryVerificationAtRuntime => "retry-verification-at-runtime",
            ClassStatus::Verified => "verified",
            ClassStatus::Initialized => "initialized",
        };
        f.write_str(name)
    }
}
