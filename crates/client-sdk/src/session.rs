use std::sync::{PoisonError, RwLock};

use docvault_protocol::UserProfile;

#[derive(Debug, Default)]
struct State {
    access_token: Option<String>,
    user: Option<UserProfile>,
    generation: u64,
}

/// The one place the current access credential lives.
///
/// Every change bumps `generation`, which lets a request that saw a 401
/// tell whether the token it used has already been replaced.
#[derive(Debug, Default)]
pub struct SessionContext {
    state: RwLock<State>,
}

impl SessionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn access_token(&self) -> Option<String> {
        self.read(|s| s.access_token.clone())
    }

    pub fn user(&self) -> Option<UserProfile> {
        self.read(|s| s.user.clone())
    }

    pub fn generation(&self) -> u64 {
        self.read(|s| s.generation)
    }

    /// Token and generation read together.
    pub fn snapshot(&self) -> (Option<String>, u64) {
        self.read(|s| (s.access_token.clone(), s.generation))
    }

    pub fn is_authenticated(&self) -> bool {
        self.read(|s| s.access_token.is_some())
    }

    pub fn sign_in(&self, access_token: String, user: UserProfile) {
        self.write(|s| {
            s.access_token = Some(access_token);
            s.user = Some(user);
        });
    }

    pub fn replace_token(&self, access_token: String) {
        self.write(|s| s.access_token = Some(access_token));
    }

    pub fn clear(&self) {
        self.write(|s| {
            s.access_token = None;
            s.user = None;
        });
    }

    fn read<T>(&self, f: impl FnOnce(&State) -> T) -> T {
        f(&self.state.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn write(&self, f: impl FnOnce(&mut State)) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut state);
        state.generation += 1;
    }
}
