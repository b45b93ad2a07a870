//! Small state trackers for a surface's lifetime.

/// Credentials a surface may be loaded with.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Authentication {
    #[default]
    None,
    Token(String),
}

impl Authentication {
    pub fn token(&self) -> Option<&str> {
        match self {
            Authentication::None => None,
            Authentication::Token(token) => Some(token),
        }
    }
}

/// Remembers which token the surface has already received, so it is only
/// put on the load URL once.
///
/// A token becomes "sent" only after [`confirm_token_sent`] following a
/// successful load.
///
/// [`confirm_token_sent`]: TokenTracker::confirm_token_sent
#[derive(Debug, Default, Clone)]
pub struct TokenTracker {
    sent: Option<String>,
    pending: Option<String>,
    identity: Option<String>,
}

impl TokenTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the next load must carry the token. Marks it pending.
    ///
    /// Loading without a token forgets any previously sent one.
    pub fn should_send_token(&mut self, auth: &Authentication) -> bool {
        let Some(token) = auth.token() else {
            self.reset();
            return false;
        };
        let needs_send = self.sent.as_deref() != Some(token);
        self.pending = needs_send.then(|| token.to_string());
        needs_send
    }

    /// Whether a follow-up navigation still needs the token. No side effects.
    pub fn should_retain_token(&self, auth: &Authentication) -> bool {
        auth.token().is_some_and(|token| self.sent.as_deref() != Some(token))
    }

    /// The load that carried the pending token finished.
    pub fn confirm_token_sent(&mut self) {
        if let Some(token) = self.pending.take() {
            self.sent = Some(token);
        }
    }

    pub fn reset(&mut self) {
        self.sent = None;
        self.pending = None;
    }

    /// Tie the tracker to the surface identity it describes. Switching to a
    /// different identity resets it; rebinding the same one does not.
    pub fn bind_identity(&mut self, key: &str) {
        if self.identity.as_deref() == Some(key) {
            return;
        }
        if self.identity.is_some() {
            log::debug!("Surface identity changed, forgetting sent token");
        }
        self.reset();
        self.identity = Some(key.to_string());
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }
}

/// Fires once per load when the surface is both loaded and presented,
/// in whichever order those happen.
#[derive(Debug, Default, Clone)]
pub struct PresentationTracker {
    loaded: bool,
    presented: bool,
    reported: bool,
}

impl PresentationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// A new load started; presentation may be reported again once it
    /// finishes.
    pub fn start_load(&mut self) {
        self.loaded = false;
        self.reported = false;
    }

    /// Returns true if this call is the one that should report.
    pub fn mark_loaded(&mut self) -> bool {
        self.loaded = true;
        self.check()
    }

    /// Returns true if this call is the one that should report.
    pub fn mark_presented(&mut self) -> bool {
        self.presented = true;
        self.check()
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn is_presented(&self) -> bool {
        self.presented
    }

    fn check(&mut self) -> bool {
        if self.loaded && self.presented && !self.reported {
            self.reported = true;
            return true;
        }
        false
    }
}
