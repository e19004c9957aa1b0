//! Static route table with inherited access rules

use crate::types::Role;
use std::collections::HashSet;

/// A route and its nested children
///
/// `requires_auth` and `allowed_roles` left as `None` inherit from the nearest
/// ancestor that declares them. A child path starting with `/` is absolute.
#[derive(Debug, Clone, Default)]
pub struct RouteDescriptor {
    pub path: String,
    pub name: Option<String>,
    pub requires_auth: Option<bool>,
    pub allowed_roles: Option<HashSet<Role>>,
    /// Only meaningful to signed-out visitors (login, register)
    pub guest_only: bool,
    /// Root or legacy dashboard path that forwards to the role landing route
    pub landing_alias: bool,
    pub children: Vec<RouteDescriptor>,
}

impl RouteDescriptor {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn requires_auth(mut self, requires_auth: bool) -> Self {
        self.requires_auth = Some(requires_auth);
        self
    }

    pub fn roles(mut self, roles: impl IntoIterator<Item = Role>) -> Self {
        self.allowed_roles = Some(roles.into_iter().collect());
        self
    }

    pub fn guest_only(mut self) -> Self {
        self.guest_only = true;
        self
    }

    pub fn landing_alias(mut self) -> Self {
        self.landing_alias = true;
        self
    }

    pub fn children(mut self, children: Vec<RouteDescriptor>) -> Self {
        self.children = children;
        self
    }
}

/// Effective access rules of the route matching a path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRoute {
    pub name: Option<String>,
    pub pattern: String,
    pub requires_auth: bool,
    pub allowed_roles: Option<HashSet<Role>>,
    pub guest_only: bool,
    pub landing_alias: bool,
    pub params: Vec<(String, String)>,
}

impl ResolvedRoute {
    /// Whether `role` passes the declared allow-list
    pub fn permits(&self, role: Role) -> bool {
        self.allowed_roles
            .as_ref()
            .is_none_or(|roles| roles.contains(&role))
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone)]
enum Segment {
    Static(String),
    Param(String),
}

#[derive(Debug, Clone)]
struct CompiledRoute {
    pattern: String,
    segments: Vec<Segment>,
    name: Option<String>,
    requires_auth: bool,
    allowed_roles: Option<HashSet<Role>>,
    guest_only: bool,
    landing_alias: bool,
}

impl CompiledRoute {
    fn matches(&self, path: &[&str]) -> Option<Vec<(String, String)>> {
        if path.len() != self.segments.len() {
            return None;
        }
        let mut params = Vec::new();
        for (segment, part) in self.segments.iter().zip(path) {
            match segment {
                Segment::Static(s) if s == part => {}
                Segment::Static(_) => return None,
                Segment::Param(key) => params.push((key.clone(), (*part).to_string())),
            }
        }
        Some(params)
    }
}

/// Read-only route tree flattened for matching
///
/// Children are matched before their parent, so a `""` child wins over the
/// layout route that hosts it.
#[derive(Debug, Clone)]
pub struct RouteTable {
    routes: Vec<CompiledRoute>,
}

impl RouteTable {
    pub fn new(routes: Vec<RouteDescriptor>) -> Self {
        let mut compiled = Vec::new();
        for route in &routes {
            compile(route, "/", false, None, &mut compiled);
        }
        Self { routes: compiled }
    }

    /// Resolve a path (without query) to its effective rules
    pub fn resolve(&self, path: &str) -> Option<ResolvedRoute> {
        let parts = split_path(path);
        self.routes.iter().find_map(|route| {
            route.matches(&parts).map(|params| ResolvedRoute {
                name: route.name.clone(),
                pattern: route.pattern.clone(),
                requires_auth: route.requires_auth,
                allowed_roles: route.allowed_roles.clone(),
                guest_only: route.guest_only,
                landing_alias: route.landing_alias,
                params,
            })
        })
    }

    /// Route surface of the LMS front end
    pub fn lms() -> Self {
        use Role::{Admin, Student, Teacher};

        Self::new(vec![
            RouteDescriptor::new("/login").named("login").guest_only(),
            RouteDescriptor::new("/register").named("register").guest_only(),
            RouteDescriptor::new("/forgot-password").named("forgot-password"),
            RouteDescriptor::new("/").requires_auth(true).children(vec![
                RouteDescriptor::new("").named("home").landing_alias(),
                RouteDescriptor::new("dashboard").named("dashboard").landing_alias(),
                RouteDescriptor::new("student/dashboard")
                    .named("student-dashboard")
                    .landing_alias(),
                RouteDescriptor::new("teacher/dashboard")
                    .named("teacher-dashboard")
                    .landing_alias(),
                RouteDescriptor::new("admin/dashboard")
                    .named("admin-dashboard")
                    .landing_alias(),
                RouteDescriptor::new("profile").named("profile"),
                RouteDescriptor::new("/about").named("about"),
                RouteDescriptor::new("student").roles([Student]).children(vec![
                    RouteDescriptor::new("courses").named("student-courses"),
                    RouteDescriptor::new("courses/:id").named("student-course-detail"),
                    RouteDescriptor::new("assignments").named("student-assignments"),
                    RouteDescriptor::new("exams").named("student-exams"),
                ]),
                RouteDescriptor::new("teacher").roles([Teacher]).children(vec![
                    RouteDescriptor::new("courses").named("teacher-courses"),
                    RouteDescriptor::new("courses/:id").named("teacher-course-detail"),
                    RouteDescriptor::new("courses/:id/checkins").named("teacher-checkins"),
                    RouteDescriptor::new("assignments/:id/submissions")
                        .named("teacher-submissions"),
                ]),
                RouteDescriptor::new("admin").roles([Admin]).children(vec![
                    RouteDescriptor::new("users").named("admin-users"),
                    RouteDescriptor::new("courses").named("admin-courses"),
                ]),
                RouteDescriptor::new("assignments/:id")
                    .named("assignment-detail")
                    .roles([Student, Teacher]),
                RouteDescriptor::new("exams/:id")
                    .named("exam-detail")
                    .roles([Student, Teacher]),
            ]),
        ])
    }
}

fn compile(
    route: &RouteDescriptor,
    parent: &str,
    inherited_auth: bool,
    inherited_roles: Option<&HashSet<Role>>,
    out: &mut Vec<CompiledRoute>,
) {
    let pattern = if route.path.starts_with('/') {
        route.path.clone()
    } else if route.path.is_empty() {
        parent.to_string()
    } else {
        format!("{}/{}", parent.trim_end_matches('/'), route.path)
    };
    let requires_auth = route.requires_auth.unwrap_or(inherited_auth);
    let allowed_roles = route
        .allowed_roles
        .clone()
        .or_else(|| inherited_roles.cloned());

    for child in &route.children {
        compile(child, &pattern, requires_auth, allowed_roles.as_ref(), out);
    }

    let segments = split_path(&pattern)
        .into_iter()
        .map(|part| match part.strip_prefix(':') {
            Some(key) => Segment::Param(key.to_string()),
            None => Segment::Static(part.to_string()),
        })
        .collect();

    out.push(CompiledRoute {
        pattern,
        segments,
        name: route.name.clone(),
        requires_auth,
        allowed_roles,
        guest_only: route.guest_only,
        landing_alias: route.landing_alias,
    });
}

fn split_path(path: &str) -> Vec<&str> {
    path.split('/').filter(|part| !part.is_empty()).collect()
}
