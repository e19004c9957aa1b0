//! Navigation guard evaluated before every route transition

use crate::auth_client::AuthClient;
use crate::error::Result;
use crate::router::{login_redirect, NavigationTarget, LOGIN_PATH};
use crate::routes::RouteTable;
use crate::session::SessionStore;
use crate::types::Role;
use std::sync::Arc;
use tracing::{debug, warn};

/// Outcome of guarding one transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavigationDecision {
    Allow,
    Redirect(String),
    /// Signed in, but the route's allow-list excludes the role
    Forbidden { path: String, role: Role },
}

/// Navigation guard
///
/// Holds no state of its own: each call decides from the target route and
/// the current session, hydrating the session first when a token exists.
pub struct NavigationGuard<C: AuthClient> {
    session: Arc<SessionStore>,
    client: Arc<C>,
    routes: RouteTable,
}

impl<C: AuthClient> NavigationGuard<C> {
    pub fn new(session: Arc<SessionStore>, client: Arc<C>, routes: RouteTable) -> Self {
        Self {
            session,
            client,
            routes,
        }
    }

    pub fn session(&self) -> &Arc<SessionStore> {
        &self.session
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    /// Decide whether navigation to `to` may proceed
    pub async fn before_each(&self, to: &str) -> Result<NavigationDecision> {
        let target = NavigationTarget::parse(to);

        if !self.session.is_authenticated() && self.session.token_store().access_token()?.is_some() {
            if let Err(e) = self.session.fetch_user(&*self.client).await {
                warn!(path = %target.path, error = %e, "Session hydration failed, logging out");
                self.session.logout()?;
                return Ok(NavigationDecision::Redirect(LOGIN_PATH.to_string()));
            }
        }

        let user = self.session.user();
        if let Some(user) = &user {
            if user.role == Role::Unknown {
                return self.to_landing(user.role);
            }
        }

        let route = self.routes.resolve(&target.path);
        let requires_auth = route.as_ref().is_some_and(|r| r.requires_auth);

        if let (Some(user), Some(route)) = (&user, &route) {
            if route.guest_only || (requires_auth && route.landing_alias) {
                return self.to_landing(user.role);
            }
        }

        let Some(user) = user else {
            if requires_auth {
                debug!(path = %target.path, "Unauthenticated, redirecting to login");
                return Ok(NavigationDecision::Redirect(login_redirect(&target.full_path())));
            }
            return Ok(NavigationDecision::Allow);
        };

        if let Some(route) = &route {
            if !route.permits(user.role) {
                warn!(path = %target.path, role = %user.role, "Route not permitted for role");
                return Ok(NavigationDecision::Forbidden {
                    path: target.path,
                    role: user.role,
                });
            }
        }

        Ok(NavigationDecision::Allow)
    }

    /// Redirect to the role landing route, or log out a session without a usable role
    fn to_landing(&self, role: Role) -> Result<NavigationDecision> {
        match role.landing_route() {
            Some(landing) => Ok(NavigationDecision::Redirect(landing.to_string())),
            None => {
                warn!(role = %role, "Session has no recognized role, logging out");
                self.session.logout()?;
                Ok(NavigationDecision::Redirect(LOGIN_PATH.to_string()))
            }
        }
    }
}
