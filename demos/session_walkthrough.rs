//! Session walkthrough against a running LMS API
//!
//! Usage:
//!   LMS_USERNAME=alice LMS_PASSWORD=secret cargo run --example session_walkthrough

use lms_rs_client::{
    AuthClientConfig, AuthClientHttp, FileStorage, Location, LoginCredentials, NavigationGuard,
    RouteTable, Router, SessionStore, TokenStore,
};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = AuthClientConfig::from_env()?;
    let storage_path = std::env::var("LMS_SESSION_FILE").unwrap_or_else(|_| "lms-session.json".to_string());
    let username = std::env::var("LMS_USERNAME").unwrap_or_else(|_| "student1".to_string());
    let password = std::env::var("LMS_PASSWORD").unwrap_or_default();

    println!("=== LMS Session Walkthrough ===");
    println!("API: {}", config.base_url);
    println!("Session file: {}", storage_path);
    println!();

    let location = Location::new("/");
    let tokens = TokenStore::new(Arc::new(FileStorage::new(storage_path)));
    let session = SessionStore::new(tokens, location.clone());
    let client = AuthClientHttp::new(config, session.clone())?;
    let router = Router::new(
        NavigationGuard::new(session.clone(), client.clone(), RouteTable::lms()),
        location,
    );

    // A stored session from a previous run is picked up here
    let outcome = router.push("/dashboard").await?;
    println!("Opening /dashboard -> {:?}", outcome);

    if !session.is_authenticated() {
        let credentials = LoginCredentials { username, password };
        let user = session.login(&*client, &credentials).await?;
        println!("Logged in as {} ({})", user.username, user.role);

        let outcome = router.resume_after_login().await?;
        println!("Resumed -> {:?}", outcome);
    }

    match router.push("/admin/users").await {
        Ok(outcome) => println!("Opening /admin/users -> {:?}", outcome),
        Err(e) => println!("Opening /admin/users -> {}", e),
    }

    println!("Current location: {}", router.current());
    Ok(())
}
