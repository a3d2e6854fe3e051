use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use common_stats::CappedHashMap;
use serde::Serialize;

use crate::envelope::HttpMethod;

/// Normalize a route or request path: leading `/`, no trailing `/`, and the
/// root path (`/` or empty) becomes `""`.
pub fn normalize_path(path: &str) -> String {
    let trimmed = path.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}

/// Per (route, app, HTTP method) counters
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct HttpMethodStats {
    pub request_count: u64,
    /// Counts for status codes in 200..=599
    pub status_codes: BTreeMap<u16, u64>,
    /// Requests with any other status code
    pub http_other_count: u64,
    /// Request body bytes, for requests that reported their size
    pub request_bytes: u64,
    pub response_bytes: u64,
    pub last_access: Option<DateTime<Utc>>,
    pub user_agents: CappedHashMap<String, u64>,
    /// `X-Forwarded-For` addresses
    pub forwarders: CappedHashMap<String, u64>,
}

impl HttpMethodStats {
    pub fn new(max_user_agents: usize, max_forwarders: usize) -> HttpMethodStats {
        HttpMethodStats {
            request_count: 0,
            status_codes: BTreeMap::new(),
            http_other_count: 0,
            request_bytes: 0,
            response_bytes: 0,
            last_access: None,
            user_agents: CappedHashMap::new(max_user_agents),
            forwarders: CappedHashMap::new(max_forwarders),
        }
    }

    /// Record one request. Returns how many user agent / forwarder keys were refused
    /// because their map was full; the request itself is always counted.
    pub fn record(
        &mut self,
        status_code: u16,
        request_bytes: Option<u64>,
        response_bytes: u64,
        user_agent: Option<&str>,
        forwarded: &[String],
        now: DateTime<Utc>,
    ) -> usize {
        self.request_count += 1;
        if (200..=599).contains(&status_code) {
            *self.status_codes.entry(status_code).or_insert(0) += 1;
        } else {
            self.http_other_count += 1;
        }
        self.request_bytes = self
            .request_bytes
            .saturating_add(request_bytes.unwrap_or_default());
        self.response_bytes = self.response_bytes.saturating_add(response_bytes);
        self.last_access = Some(self.last_access.map_or(now, |prev| prev.max(now)));

        let mut rejected = 0;
        if let Some(ua) = user_agent.filter(|ua| !ua.is_empty()) {
            match self.user_agents.get_mut(ua) {
                Some(cnt) => *cnt += 1,
                None => match self.user_agents.get_or_insert_with(ua.to_string(), || 0) {
                    Ok(cnt) => *cnt += 1,
                    Err(_) => rejected += 1,
                },
            }
        }
        for fwd in forwarded.iter().filter(|f| !f.is_empty()) {
            match self.forwarders.get_or_insert_with(fwd.clone(), || 0) {
                Ok(cnt) => *cnt += 1,
                Err(_) => rejected += 1,
            }
        }
        rejected
    }
}

/// Traffic of one application on one route
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AppRouteStats {
    pub app_id: String,
    pub methods: BTreeMap<HttpMethod, HttpMethodStats>,
}

impl AppRouteStats {
    pub fn new(app_id: &str) -> AppRouteStats {
        AppRouteStats {
            app_id: app_id.to_string(),
            methods: BTreeMap::new(),
        }
    }

    pub fn method_mut(
        &mut self,
        method: HttpMethod,
        max_user_agents: usize,
        max_forwarders: usize,
    ) -> &mut HttpMethodStats {
        self.methods
            .entry(method)
            .or_insert_with(|| HttpMethodStats::new(max_user_agents, max_forwarders))
    }

    pub fn request_count(&self) -> u64 {
        self.methods.values().map(|m| m.request_count).sum()
    }
}

/// One registered (or dynamically discovered) route: a path on an HTTP host or a TCP port
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct RouteStats {
    /// The platform's route GUID, if the route was registered
    pub route_id: Option<String>,
    pub apps: BTreeMap<String, AppRouteStats>,
}

impl RouteStats {
    pub fn new(route_id: Option<String>) -> RouteStats {
        RouteStats {
            route_id,
            apps: BTreeMap::new(),
        }
    }

    pub fn app_mut(&mut self, app_id: &str) -> &mut AppRouteStats {
        self.apps
            .entry(app_id.to_string())
            .or_insert_with(|| AppRouteStats::new(app_id))
    }

    pub fn request_count(&self) -> u64 {
        self.apps.values().map(|a| a.request_count()).sum()
    }
}

/**
 * All routes of one host (e.g., `myapp` in `myapp.apps.example.com`).
 *
 * HTTP routes are keyed by normalized path. `route_index` holds the same paths sorted
 * by descending length so `find_path_match()` can do longest-prefix matching with a
 * linear scan. The index is rebuilt whenever a path is added.
 */
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct HostStats {
    pub host: String,
    pub routes: HashMap<String, RouteStats>,
    pub tcp_routes: BTreeMap<u16, RouteStats>,
    #[serde(skip)]
    route_index: Vec<String>,
}

impl HostStats {
    pub fn new(host: &str) -> HostStats {
        HostStats {
            host: host.to_string(),
            ..Default::default()
        }
    }

    pub fn route_index(&self) -> &[String] {
        &self.route_index
    }

    pub fn rebuild_route_index(&mut self) {
        let mut paths: Vec<String> = self.routes.keys().cloned().collect();
        paths.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        self.route_index = paths;
    }

    /// The longest registered path that `path` equals or extends at a `/` boundary.
    /// `""` if nothing matches.
    pub fn find_path_match(&self, path: &str) -> &str {
        for candidate in &self.route_index {
            if let Some(rest) = path.strip_prefix(candidate.as_str()) {
                if rest.is_empty() || rest.starts_with('/') {
                    return candidate;
                }
            }
        }
        ""
    }

    /// Add a route for `path` (normalized by the caller) if it doesn't exist yet
    pub fn register_path(&mut self, path: &str, route_id: Option<String>) -> &mut RouteStats {
        if !self.routes.contains_key(path) {
            self.routes.insert(path.to_string(), RouteStats::new(None));
            self.rebuild_route_index();
        }
        let route = self
            .routes
            .entry(path.to_string())
            .or_insert_with(|| RouteStats::new(None));
        if route.route_id.is_none() {
            route.route_id = route_id;
        }
        route
    }

    /// The route a request for `path` is attributed to. Requests not matching any
    /// registered path go to the root route, which is created on demand.
    pub fn route_for_path_mut(&mut self, path: &str) -> &mut RouteStats {
        let matched = self.find_path_match(path).to_string();
        self.register_path(&matched, None)
    }

    pub fn tcp_route_mut(&mut self, port: u16, route_id: Option<String>) -> &mut RouteStats {
        let route = self
            .tcp_routes
            .entry(port)
            .or_insert_with(|| RouteStats::new(None));
        if route.route_id.is_none() {
            route.route_id = route_id;
        }
        route
    }

    pub fn request_count(&self) -> u64 {
        self.routes
            .values()
            .chain(self.tcp_routes.values())
            .map(|r| r.request_count())
            .sum()
    }
}

/// All hosts under one domain. The number of hosts is capped.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DomainStats {
    pub domain: String,
    pub hosts: CappedHashMap<String, HostStats>,
}

impl DomainStats {
    pub fn new(domain: &str, max_hosts: usize) -> DomainStats {
        DomainStats {
            domain: domain.to_string(),
            hosts: CappedHashMap::new(max_hosts),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn host_with_paths(paths: &[&str]) -> HostStats {
        let mut host = HostStats::new("www");
        for p in paths {
            host.register_path(&normalize_path(p), None);
        }
        host
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path(""), "");
        assert_eq!(normalize_path("/"), "");
        assert_eq!(normalize_path("foo/bar/"), "/foo/bar");
        assert_eq!(normalize_path("/foo"), "/foo");
    }

    #[test]
    fn test_longest_prefix_match() {
        let host = host_with_paths(&["", "/webappa", "/webappa/subapp1"]);
        assert_eq!(host.route_index(), &["/webappa/subapp1", "/webappa", ""]);
        assert_eq!(host.find_path_match("/webappa/doc"), "/webappa");
        assert_eq!(host.find_path_match("/webappabc"), "");
        assert_eq!(host.find_path_match("/webappa/subapp1/x"), "/webappa/subapp1");
        assert_eq!(host.find_path_match("/webappa"), "/webappa");
        assert_eq!(host.find_path_match(""), "");
    }

    #[test]
    fn test_no_root_route() {
        let mut host = host_with_paths(&["/api"]);
        assert_eq!(host.find_path_match("/other"), "");
        // unmatched requests create the root route
        host.route_for_path_mut("/other");
        assert!(host.routes.contains_key(""));
        assert_eq!(host.route_index(), &["/api", ""]);
        host.route_for_path_mut("/api/v1");
        assert_eq!(host.routes.len(), 2);
    }

    #[test]
    fn test_register_keeps_route_id() {
        let mut host = HostStats::new("www");
        host.route_for_path_mut("/x");
        host.register_path("", Some("route-guid".to_string()));
        assert_eq!(host.routes[""].route_id.as_deref(), Some("route-guid"));
        host.tcp_route_mut(61001, Some("tcp-guid".to_string()));
        host.tcp_route_mut(61001, None);
        assert_eq!(host.tcp_routes[&61001].route_id.as_deref(), Some("tcp-guid"));
    }

    #[test]
    fn test_method_stats() {
        let now = Utc::now();
        let mut stats = HttpMethodStats::new(2, 1);
        let fwd = vec!["10.1.1.1".to_string(), "10.2.2.2".to_string()];
        assert_eq!(stats.record(200, Some(20), 100, Some("curl"), &fwd, now), 1);
        assert_eq!(stats.record(200, Some(u64::MAX), 50, Some("curl"), &[], now), 0);
        assert_eq!(stats.record(99, None, 0, None, &[], now), 0);
        assert_eq!(stats.record(503, None, 0, Some("wget"), &[], now), 0);
        assert_eq!(stats.record(404, None, 0, Some("firefox"), &[], now), 1);
        assert_eq!(stats.request_count, 5);
        assert_eq!(stats.http_other_count, 1);
        assert_eq!(stats.status_codes[&200], 2);
        assert_eq!(stats.status_codes.values().sum::<u64>(), 4);
        assert_eq!(stats.response_bytes, 150);
        assert_eq!(stats.request_bytes, u64::MAX);
        assert_eq!(stats.user_agents.get("curl"), Some(&2));
        assert_eq!(stats.user_agents.get("firefox"), None);
        assert_eq!(stats.forwarders.len(), 1);
    }

    /// The 101st distinct user agent is refused while the first 100 keep their counts
    #[test]
    fn test_user_agent_cap() {
        let now = Utc::now();
        let mut stats = HttpMethodStats::new(100, 10);
        for i in 0..100 {
            let ua = format!("agent-{}", i);
            for _ in 0..=i % 3 {
                assert_eq!(stats.record(200, None, 0, Some(&ua), &[], now), 0);
            }
        }
        assert_eq!(stats.record(200, None, 0, Some("agent-100"), &[], now), 1);
        assert_eq!(stats.user_agents.len(), 100);
        assert_eq!(stats.user_agents.get("agent-100"), None);
        for i in 0..100 {
            assert_eq!(
                stats.user_agents.get(format!("agent-{}", i).as_str()),
                Some(&(i % 3 + 1))
            );
        }
        // known agents still count once the map is full
        stats.record(200, None, 0, Some("agent-7"), &[], now);
        assert_eq!(stats.user_agents.get("agent-7"), Some(&3));
    }
}
