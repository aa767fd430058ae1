use sendwave_core::UserId;

/// Caller identity for a request.
///
/// Authentication happens upstream; every campaign and wallet route is scoped
/// to this user.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct UserContext {
    user_id: UserId,
}

impl UserContext {
    pub fn new(user_id: UserId) -> Self {
        Self { user_id }
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }
}
