//! Current location and guarded navigation

use crate::auth_client::AuthClient;
use crate::error::{ClientError, Result};
use crate::guard::{NavigationDecision, NavigationGuard};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info};

pub const LOGIN_PATH: &str = "/login";

/// Maximum redirects followed by a single navigation
pub const MAX_REDIRECTS: usize = 4;

/// Performs navigations that bypass the guard and discard pending ones
pub trait Navigator: Send + Sync + 'static {
    fn hard_navigate(&self, path: &str);
}

struct LocationState {
    path: String,
    generation: u64,
}

/// Committed location plus a generation counter
///
/// Every navigation takes a new generation; a navigation may only commit if
/// no newer one has started since.
pub struct Location {
    state: Mutex<LocationState>,
}

impl Location {
    pub fn new(initial: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(LocationState {
                path: initial.into(),
                generation: 0,
            }),
        })
    }

    pub fn current(&self) -> String {
        self.lock().path.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LocationState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn begin(&self) -> u64 {
        let mut state = self.lock();
        state.generation += 1;
        state.generation
    }

    fn is_latest(&self, generation: u64) -> bool {
        self.lock().generation == generation
    }

    fn commit(&self, generation: u64, path: &str) -> bool {
        let mut state = self.lock();
        if state.generation != generation {
            return false;
        }
        state.path = path.to_string();
        true
    }
}

impl Navigator for Location {
    fn hard_navigate(&self, path: &str) {
        let mut state = self.lock();
        state.generation += 1;
        state.path = path.to_string();
        info!(path = %path, "Hard navigation");
    }
}

/// A navigation target split into path and decoded query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavigationTarget {
    pub path: String,
    pub query: Vec<(String, String)>,
}

impl NavigationTarget {
    /// Parse `path?query#fragment`; the fragment is dropped
    pub fn parse(to: &str) -> Self {
        let to = to.split_once('#').map_or(to, |(before, _)| before);
        let (path, query) = to.split_once('?').unwrap_or((to, ""));
        let query = query
            .split('&')
            .filter(|pair| !pair.is_empty())
            .map(|pair| {
                let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
                (decode_component(k), decode_component(v))
            })
            .collect();
        let path = if path.is_empty() { "/" } else { path };

        Self {
            path: path.to_string(),
            query,
        }
    }

    pub fn query(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn full_path(&self) -> String {
        if self.query.is_empty() {
            return self.path.clone();
        }
        let query: Vec<String> = self
            .query
            .iter()
            .map(|(k, v)| format!("{}={}", encode_component(k), encode_component(v)))
            .collect();
        format!("{}?{}", self.path, query.join("&"))
    }
}

fn decode_component(s: &str) -> String {
    let s = s.replace('+', " ");
    match urlencoding::decode(&s) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => s.clone(),
    }
}

/// Percent-encode a query component, leaving `/` readable as browsers do
fn encode_component(s: &str) -> String {
    urlencoding::encode(s).replace("%2F", "/")
}

/// Login location that returns to `return_to` afterwards
pub fn login_redirect(return_to: &str) -> String {
    format!("{LOGIN_PATH}?redirect={}", encode_component(return_to))
}

/// Result of a navigation that was not rejected
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavigationOutcome {
    /// The location now is this path
    Committed(String),
    /// A newer navigation started before this one resolved; nothing applied
    Superseded,
}

/// Guarded router over a shared location
pub struct Router<C: AuthClient> {
    guard: NavigationGuard<C>,
    location: Arc<Location>,
}

impl<C: AuthClient> Router<C> {
    pub fn new(guard: NavigationGuard<C>, location: Arc<Location>) -> Self {
        Self { guard, location }
    }

    pub fn current(&self) -> String {
        self.location.current()
    }

    pub fn guard(&self) -> &NavigationGuard<C> {
        &self.guard
    }

    /// Navigate to `to`, following guard redirects
    ///
    /// Forbidden routes leave the location untouched and return
    /// `ClientError::Forbidden`.
    pub async fn push(&self, to: &str) -> Result<NavigationOutcome> {
        let generation = self.location.begin();
        let mut target = to.to_string();

        for _ in 0..=MAX_REDIRECTS {
            let decision = self.guard.before_each(&target).await;
            if !self.location.is_latest(generation) {
                debug!(path = %to, "Navigation superseded");
                return Ok(NavigationOutcome::Superseded);
            }

            match decision? {
                NavigationDecision::Allow => {
                    if !self.location.commit(generation, &target) {
                        return Ok(NavigationOutcome::Superseded);
                    }
                    debug!(path = %target, "Navigation committed");
                    return Ok(NavigationOutcome::Committed(target));
                }
                NavigationDecision::Redirect(next) => {
                    debug!(from = %target, to = %next, "Navigation redirected");
                    target = next;
                }
                NavigationDecision::Forbidden { path, role } => {
                    return Err(ClientError::Forbidden {
                        path,
                        reason: format!("role {role} is not allowed"),
                    });
                }
            }
        }

        Err(ClientError::RedirectLoop(to.to_string()))
    }

    /// Continue to the page that sent the user to login, or to their landing route
    pub async fn resume_after_login(&self) -> Result<NavigationOutcome> {
        let current = NavigationTarget::parse(&self.current());
        let to = current
            .query("redirect")
            .filter(|path| path.starts_with('/') && !path.starts_with("//"))
            .unwrap_or("/")
            .to_string();
        self.push(&to).await
    }
}
