//! Integration tests for guarded navigation against a mock API

use lms_rs_client::auth_client::{PROFILE_PATH, TOKEN_PATH, TOKEN_REFRESH_PATH};
use lms_rs_client::{
    AuthClientConfig, AuthClientHttp, AuthTokens, ClientError, Location, LoginCredentials,
    NavigationGuard, NavigationOutcome, Role, RouteDescriptor, RouteTable, Router, SessionStore,
    TokenStore,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct App {
    session: Arc<SessionStore>,
    client: Arc<AuthClientHttp>,
    router: Router<AuthClientHttp>,
    location: Arc<Location>,
}

fn app_with_routes(server: &MockServer, routes: RouteTable) -> App {
    let location = Location::new("/login");
    let session = SessionStore::new(TokenStore::in_memory(), location.clone());
    let config = AuthClientConfig::new(server.uri(), Duration::from_secs(5)).unwrap();
    let client = AuthClientHttp::new(config, session.clone()).unwrap();
    let guard = NavigationGuard::new(session.clone(), client.clone(), routes);
    let router = Router::new(guard, location.clone());
    App {
        session,
        client,
        router,
        location,
    }
}

fn app(server: &MockServer) -> App {
    app_with_routes(server, RouteTable::lms())
}

fn sign_in(app: &App, access: &str) {
    app.session
        .token_store()
        .set(&AuthTokens {
            access_token: access.to_string(),
            refresh_token: "r1".to_string(),
        })
        .unwrap();
}

fn profile(role: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "id": 12, "username": "liu", "email": "liu@example.com", "role": role
    }))
}

fn committed(path: &str) -> NavigationOutcome {
    NavigationOutcome::Committed(path.to_string())
}

#[tokio::test]
async fn test_unauthenticated_visitor_is_sent_to_login() {
    let server = MockServer::start().await;
    let app = app(&server);

    let outcome = app.router.push("/admin/users").await.unwrap();

    assert_eq!(outcome, committed("/login?redirect=/admin/users"));
    assert_eq!(app.location.current(), "/login?redirect=/admin/users");
}

#[tokio::test]
async fn test_login_resumes_original_destination() {
    let server = MockServer::start().await;
    let app = app(&server);

    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access": "a1", "refresh": "r1"})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(PROFILE_PATH))
        .and(header("authorization", "Bearer a1"))
        .respond_with(profile("admin"))
        .expect(1)
        .mount(&server)
        .await;

    app.router.push("/admin/users").await.unwrap();
    let user = app
        .session
        .login(
            &*app.client,
            &LoginCredentials {
                username: "liu".to_string(),
                password: "secret".to_string(),
            },
        )
        .await
        .unwrap();
    assert_eq!(user.role, Role::Admin);
    assert_eq!(
        app.session.token_store().cached_role().unwrap(),
        Some(Role::Admin)
    );

    let outcome = app.router.resume_after_login().await.unwrap();
    assert_eq!(outcome, committed("/admin/users"));
}

#[tokio::test]
async fn test_signed_in_student_skips_login_page() {
    let server = MockServer::start().await;
    let app = app(&server);
    sign_in(&app, "a1");

    Mock::given(method("GET"))
        .and(path(PROFILE_PATH))
        .respond_with(profile("student"))
        .expect(1)
        .mount(&server)
        .await;

    assert_eq!(app.router.push("/login").await.unwrap(), committed("/student/courses"));
    // Hydrated once, reused afterwards
    assert_eq!(app.router.push("/register").await.unwrap(), committed("/student/courses"));
}

#[tokio::test]
async fn test_teacher_aliases_land_on_teacher_courses() {
    let server = MockServer::start().await;
    let app = app(&server);
    sign_in(&app, "a1");

    Mock::given(method("GET"))
        .and(path(PROFILE_PATH))
        .respond_with(profile("teacher"))
        .expect(1)
        .mount(&server)
        .await;

    for alias in ["/", "/dashboard", "/teacher/dashboard", "/student/dashboard", "/admin/dashboard"] {
        assert_eq!(
            app.router.push(alias).await.unwrap(),
            committed("/teacher/courses"),
            "alias {alias}"
        );
    }
}

#[tokio::test]
async fn test_forbidden_route_keeps_location() {
    let server = MockServer::start().await;
    let app = app(&server);
    sign_in(&app, "a1");

    Mock::given(method("GET"))
        .and(path(PROFILE_PATH))
        .respond_with(profile("student"))
        .mount(&server)
        .await;

    app.router.push("/student/courses").await.unwrap();
    let err = app.router.push("/teacher/courses/3").await.unwrap_err();

    assert!(matches!(err, ClientError::Forbidden { ref path, .. } if path == "/teacher/courses/3"));
    assert_eq!(app.location.current(), "/student/courses");
    assert!(app.session.is_authenticated());
}

#[tokio::test]
async fn test_hydration_refreshes_expired_token() {
    let server = MockServer::start().await;
    let app = app(&server);
    sign_in(&app, "expired");

    Mock::given(method("GET"))
        .and(path(PROFILE_PATH))
        .and(header("authorization", "Bearer expired"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(PROFILE_PATH))
        .and(header("authorization", "Bearer fresh"))
        .respond_with(profile("teacher"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(TOKEN_REFRESH_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access": "fresh"})))
        .expect(1)
        .mount(&server)
        .await;

    let outcome = app.router.push("/exams/8").await.unwrap();

    assert_eq!(outcome, committed("/exams/8"));
    assert!(app.session.is_teacher());
}

#[tokio::test]
async fn test_expired_session_without_refresh_token_ends_at_login() {
    let server = MockServer::start().await;
    let app = app(&server);
    app.session.token_store().set_access_token("expired").unwrap();

    Mock::given(method("GET"))
        .and(path(PROFILE_PATH))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    app.router.push("/teacher/courses").await.unwrap();

    assert_eq!(app.location.current(), "/login");
    assert!(app.session.token_store().access_token().unwrap().is_none());
    assert!(!app.session.is_authenticated());

    // Nothing left to hydrate from; the guard now redirects without a request
    let outcome = app.router.push("/teacher/courses").await.unwrap();
    assert_eq!(outcome, committed("/login?redirect=/teacher/courses"));
}

#[tokio::test]
async fn test_superseded_navigation_is_discarded() {
    let server = MockServer::start().await;
    let app = app(&server);
    sign_in(&app, "a1");

    Mock::given(method("GET"))
        .and(path(PROFILE_PATH))
        .respond_with(profile("student").set_delay(Duration::from_millis(150)))
        .expect(1)
        .mount(&server)
        .await;

    let (first, second) = tokio::join!(
        app.router.push("/student/exams"),
        app.router.push("/student/assignments"),
    );

    assert_eq!(first.unwrap(), NavigationOutcome::Superseded);
    assert_eq!(second.unwrap(), committed("/student/assignments"));
    assert_eq!(app.location.current(), "/student/assignments");
}

#[tokio::test]
async fn test_redirect_cycle_is_bounded() {
    let server = MockServer::start().await;
    let routes = RouteTable::new(vec![RouteDescriptor::new("/")
        .requires_auth(true)
        .children(vec![RouteDescriptor::new("student/courses").landing_alias()])]);
    let app = app_with_routes(&server, routes);
    sign_in(&app, "a1");

    Mock::given(method("GET"))
        .and(path(PROFILE_PATH))
        .respond_with(profile("student"))
        .mount(&server)
        .await;

    let err = app.router.push("/student/courses").await.unwrap_err();

    assert!(matches!(err, ClientError::RedirectLoop(_)));
    assert_eq!(app.location.current(), "/login");
}
