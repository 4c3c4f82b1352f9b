//! Candidate routes for each panel operation
//!
//! PasarGuard has shipped under several route layouts, so every logical
//! operation maps to an ordered list of (verb, path) candidates. The first one
//! that produces a recognizable answer wins. 3X-UI has a single stable layout
//! and its operations resolve to one candidate each.

use std::collections::{BTreeMap, HashSet};

use serde::Deserialize;
use serde_json::Value;

use crate::transport::HttpMethod;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    ListUsers,
    CreateUser,
    UpdateUser { username: String },
    SetTraffic { username: String },
    GetUser { username: String },
    ListGroups,
    RemoveGroups,
    ListInbounds,
    ClientTraffic { email: String },
    AddInbound,
    UpdateInbound { id: i64 },
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::ListUsers => "list users",
            Operation::CreateUser => "create user",
            Operation::UpdateUser { .. } => "update user",
            Operation::SetTraffic { .. } => "set traffic",
            Operation::GetUser { .. } => "get user",
            Operation::ListGroups => "list groups",
            Operation::RemoveGroups => "remove groups",
            Operation::ListInbounds => "list inbounds",
            Operation::ClientTraffic { .. } => "client traffic",
            Operation::AddInbound => "add inbound",
            Operation::UpdateInbound { .. } => "update inbound",
        }
    }

    /// Mutating operations stop at the first client error instead of trying
    /// the remaining candidates with the same rejected payload.
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            Operation::CreateUser
                | Operation::UpdateUser { .. }
                | Operation::SetTraffic { .. }
                | Operation::RemoveGroups
                | Operation::AddInbound
                | Operation::UpdateInbound { .. }
        )
    }

    /// Word a schema route must contain to be worth trying for this operation.
    pub fn probe_subject(&self) -> Option<&'static str> {
        match self {
            Operation::ListUsers => Some("user"),
            _ => None,
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub method: HttpMethod,
    pub path: String,
}

impl Endpoint {
    pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
        }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.method, self.path)
    }
}

const LIST_USER_PATHS: [&str; 10] = [
    "/api/users",
    "/api/admin/users",
    "/api/admin/user",
    "/api/v1/admin/users",
    "/api/v1/admin/user",
    "/api/v1/users",
    "/api/user/list",
    "/api/admin/user/list",
    "/api/v1/user/list",
    "/api/v1/admin/user/list",
];

const CREATE_USER_PATHS: [&str; 5] = [
    "/api/user",
    "/api/users",
    "/api/v1/user",
    "/api/v1/users",
    "/api/admin/users",
];

const UPDATE_USER_PATHS: [&str; 3] = ["/api/user/{}", "/api/users/{}", "/api/v1/user/{}"];

const SET_TRAFFIC_PATHS: [&str; 4] = [
    "/api/user/{}/traffic",
    "/api/user/{}/set_traffic",
    "/api/users/{}/traffic",
    "/api/admin/user/{}/traffic",
];

const GROUP_PATHS: [&str; 6] = [
    "/api/groups",
    "/api/admin/groups",
    "/api/v1/groups",
    "/api/group",
    "/api/admin/group",
    "/api/v1/group",
];

/// Schema documents checked for route discovery, in order.
pub const SCHEMA_DOCUMENTS: [&str; 6] = [
    "/openapi.json",
    "/api/openapi.json",
    "/docs",
    "/api/docs",
    "/swagger.json",
    "/api/swagger.json",
];

fn fill(template: &str, segment: &str) -> String {
    template.replacen("{}", &urlencoding::encode(segment), 1)
}

fn owned(paths: &[&str]) -> Vec<String> {
    paths.iter().map(|p| p.to_string()).collect()
}

fn each_verb(paths: &[String], verbs: &[HttpMethod]) -> Vec<Endpoint> {
    paths
        .iter()
        .flat_map(|path| verbs.iter().map(move |verb| Endpoint::new(*verb, path.clone())))
        .collect()
}

/// Static candidate lists plus routes learned from the panel's schema.
#[derive(Debug, Clone, Default)]
pub struct EndpointResolver {
    discovered: Vec<Endpoint>,
}

impl EndpointResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_discovered(discovered: Vec<Endpoint>) -> Self {
        Self { discovered }
    }

    /// Built-in candidates, in the order they are tried.
    pub fn static_candidates(operation: &Operation) -> Vec<Endpoint> {
        use HttpMethod::*;

        match operation {
            Operation::ListUsers => each_verb(&owned(&LIST_USER_PATHS), &[Get, Post]),
            Operation::CreateUser => each_verb(&owned(&CREATE_USER_PATHS), &[Post]),
            Operation::UpdateUser { username } => {
                let paths: Vec<String> = UPDATE_USER_PATHS.iter().map(|t| fill(t, username)).collect();
                each_verb(&paths, &[Put, Patch])
            }
            Operation::SetTraffic { username } => {
                let paths: Vec<String> = SET_TRAFFIC_PATHS.iter().map(|t| fill(t, username)).collect();
                each_verb(&paths, &[Put, Post])
            }
            Operation::GetUser { username } => vec![Endpoint::new(Get, fill("/api/user/{}", username))],
            Operation::ListGroups => each_verb(&owned(&GROUP_PATHS), &[Get]),
            Operation::RemoveGroups => vec![Endpoint::new(Post, "/api/groups/bulk/remove")],
            Operation::ListInbounds => vec![Endpoint::new(Get, "/panel/api/inbounds/list")],
            Operation::ClientTraffic { email } => vec![Endpoint::new(
                Get,
                fill("/panel/api/inbounds/getClientTraffics/{}", email),
            )],
            Operation::AddInbound => vec![Endpoint::new(Post, "/panel/api/inbounds/add")],
            Operation::UpdateInbound { id } => {
                vec![Endpoint::new(Post, format!("/panel/api/inbounds/update/{}", id))]
            }
        }
    }

    /// Candidates for an operation: discovered routes first, then the
    /// built-in list, without repeating a (verb, path) pair.
    pub fn resolve(&self, operation: &Operation) -> Vec<Endpoint> {
        let discovered = match operation.probe_subject() {
            Some(_) => self.discovered.clone(),
            None => Vec::new(),
        };

        let mut seen = HashSet::new();
        discovered
            .into_iter()
            .chain(Self::static_candidates(operation))
            .filter(|endpoint| seen.insert(endpoint.clone()))
            .collect()
    }
}

#[derive(Deserialize)]
struct SchemaDocument {
    paths: BTreeMap<String, BTreeMap<String, Value>>,
}

/// Extract routes mentioning `subject` from an OpenAPI or Swagger document.
///
/// Only GET and POST routes without path parameters are kept. Returns `None`
/// when the body is not a schema document at all.
pub fn parse_schema_routes(body: &str, subject: &str) -> Option<Vec<Endpoint>> {
    let document: SchemaDocument = serde_json::from_str(body).ok()?;
    let subject = subject.to_lowercase();
    let mut routes = Vec::new();
    for (path, operations) in &document.paths {
        if !path.to_lowercase().contains(&subject) || path.contains('{') {
            continue;
        }
        for verb in operations.keys() {
            match HttpMethod::from_schema(verb) {
                Some(method @ (HttpMethod::Get | HttpMethod::Post)) => {
                    routes.push(Endpoint::new(method, path.clone()));
                }
                _ => {}
            }
        }
    }
    Some(routes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listing_tries_each_path_with_both_verbs() {
        let candidates = EndpointResolver::static_candidates(&Operation::ListUsers);
        assert_eq!(candidates.len(), 20);
        assert_eq!(candidates[0], Endpoint::new(HttpMethod::Get, "/api/users"));
        assert_eq!(candidates[1], Endpoint::new(HttpMethod::Post, "/api/users"));
    }

    #[test]
    fn usernames_are_escaped_into_paths() {
        let candidates = EndpointResolver::static_candidates(&Operation::UpdateUser {
            username: "a b/c".into(),
        });
        assert_eq!(candidates[0].path, "/api/user/a%20b%2Fc");
        assert_eq!(candidates[1].method, HttpMethod::Patch);
        assert_eq!(candidates.len(), 6);
    }

    #[test]
    fn discovered_routes_come_first_without_duplicates() {
        let resolver = EndpointResolver::with_discovered(vec![
            Endpoint::new(HttpMethod::Get, "/api/users"),
            Endpoint::new(HttpMethod::Get, "/api/v2/users"),
        ]);
        let candidates = resolver.resolve(&Operation::ListUsers);

        assert_eq!(candidates[0].path, "/api/users");
        assert_eq!(candidates[1].path, "/api/v2/users");
        assert_eq!(candidates.len(), 21);

        let create = resolver.resolve(&Operation::CreateUser);
        assert!(create.iter().all(|e| e.path != "/api/v2/users"));
    }

    #[test]
    fn schema_routes_filtered_by_subject_and_verb() {
        let body = r#"{"openapi":"3.0.0","paths":{
            "/api/users":{"get":{},"delete":{}},
            "/api/user/{username}":{"get":{}},
            "/api/groups":{"get":{}},
            "/api/users/export":{"post":{}}
        }}"#;
        let routes = parse_schema_routes(body, "user").unwrap();
        assert_eq!(
            routes,
            vec![
                Endpoint::new(HttpMethod::Get, "/api/users"),
                Endpoint::new(HttpMethod::Post, "/api/users/export"),
            ]
        );
        assert!(parse_schema_routes("<html>docs</html>", "user").is_none());
    }

    #[test]
    fn schema_subject_match_ignores_case() {
        let body = r#"{"paths":{"/api/Users":{"get":{}},"/api/Admin":{"get":{}}}}"#;
        let routes = parse_schema_routes(body, "user").unwrap();
        assert_eq!(routes, vec![Endpoint::new(HttpMethod::Get, "/api/Users")]);
    }
}
