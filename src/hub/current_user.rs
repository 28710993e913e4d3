//! Externally supplied sign-in state.

use crate::domain::UserId;

/// What the authentication layer currently knows about the user.
///
/// `Loading` and `LoggedOut` are distinct: the hub ignores the former and
/// clears its user mirror on the latter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum CurrentUser {
    /// Session state not resolved yet.
    #[default]
    Loading,
    /// Explicitly signed out.
    LoggedOut,
    /// Signed in as the given user.
    LoggedIn(UserId),
}

impl CurrentUser {
    /// The signed-in user, if any.
    #[must_use]
    pub const fn user_id(&self) -> Option<&UserId> {
        match self {
            Self::LoggedIn(id) => Some(id),
            Self::Loading | Self::LoggedOut => None,
        }
    }
}
