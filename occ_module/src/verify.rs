//! Module identity verification.
//!
//! ```text
//!            discover_ok             version_ok
//!   Init ───────────────► TypeOk ───────────────► TypeVersionOk
//!    │ discover_err          │ version_err
//!    ▼                       ▼
//!   TypeError            VersionError
//!
//!   timeout while in Init or TypeOk ──► Timeout
//! ```

use crate::state_machine::StateMachine;
use serde::Serialize;

/// Verification progress of one module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifyState {
    /// Nothing confirmed yet.
    Init,
    /// Module answered DISCOVER with the expected type.
    TypeOk,
    /// Type and version both confirmed.
    TypeVersionOk,
    /// Module reported an unexpected type.
    TypeError,
    /// Module reported an unsupported version.
    VersionError,
    /// A verification command went unanswered.
    Timeout,
}

impl VerifyState {
    /// True once verification finished, successfully or not.
    pub fn is_final(self) -> bool {
        !matches!(self, Self::Init | Self::TypeOk)
    }
}

/// Verification events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifyAction {
    /// DISCOVER response with matching type.
    DiscoverOk,
    /// DISCOVER response with another type.
    DiscoverErr,
    /// READ_VERSION response accepted.
    VersionOk,
    /// READ_VERSION response rejected.
    VersionErr,
    /// Response timer expired.
    Timeout,
}

/// Verification machine starting in [`VerifyState::Init`].
pub fn verify_machine() -> StateMachine<VerifyState, VerifyAction> {
    use VerifyAction as A;
    use VerifyState as S;

    let mut sm = StateMachine::new(S::Init);
    sm.add_transition(S::Init, A::DiscoverOk, S::TypeOk)
        .add_transition(S::Init, A::DiscoverErr, S::TypeError)
        .add_transition(S::Init, A::Timeout, S::Timeout)
        .add_transition(S::TypeOk, A::VersionOk, S::TypeVersionOk)
        .add_transition(S::TypeOk, A::VersionErr, S::VersionError)
        .add_transition(S::TypeOk, A::Timeout, S::Timeout);
    sm
}
