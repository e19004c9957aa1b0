//! LMS Rust Client
//!
//! Session and authorization layer for the LMS REST API: durable token
//! storage, a bearer-authenticated HTTP client with single-flight token
//! refresh, and a navigation guard enforcing role-based route access.

pub mod auth_client;
pub mod error;
pub mod guard;
pub mod router;
pub mod routes;
pub mod session;
pub mod storage;
pub mod token_store;
pub mod types;

pub use auth_client::{ApiRequest, AuthClient, AuthClientConfig, AuthClientHttp};
pub use error::{ClientError, Result};
pub use guard::{NavigationDecision, NavigationGuard};
pub use router::{Location, NavigationOutcome, NavigationTarget, Navigator, Router};
pub use routes::{ResolvedRoute, RouteDescriptor, RouteTable};
pub use session::SessionStore;
pub use storage::{CredentialStorage, FileStorage, MemoryStorage};
pub use token_store::TokenStore;
pub use types::{AuthTokens, LoginCredentials, Role, UserIdentity};
