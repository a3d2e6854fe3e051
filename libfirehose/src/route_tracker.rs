use chrono::{DateTime, Utc};
use common_stats::CappedHashMap;
use itertools::Itertools;
use libfirehose_model::{
    envelope::HttpStartStop,
    route_stats::{normalize_path, AppRouteStats, DomainStats, HostStats},
};
use serde::Serialize;
use url::Url;

use crate::config::RouteLimits;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RouteError {
    #[error("Domain limit of {max} reached, not tracking {domain}")]
    DomainLimit { domain: String, max: usize },
    #[error("Host limit of {max} reached for domain {domain}, not tracking {host}")]
    HostLimit {
        domain: String,
        host: String,
        max: usize,
    },
    #[error("Could not parse URI {uri:?}: {reason}")]
    UriParse { uri: String, reason: String },
}

/// A request URI broken up into the parts the route tree is keyed by
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParsedUri {
    pub host: String,
    pub domain: String,
    pub path: String,
    pub port: Option<u16>,
}

/// One line of `RouteTracker::summaries()`
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RouteSummary {
    pub domain: String,
    pub host: String,
    /// The path, or `:port` for TCP routes
    pub route: String,
    pub route_id: Option<String>,
    pub request_count: u64,
}

/**
 * The route-matching tree: domain -> host -> path (or TCP port) -> app -> method.
 *
 * Domains and hosts are created on demand, up to the configured caps. Hostnames are
 * split into host and domain by the longest registered domain they end with; if
 * none matches, the first label is the host.
 */
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RouteTracker {
    #[serde(skip)]
    limits: RouteLimits,
    domains: CappedHashMap<String, DomainStats>,
    /// Registered domains, longest first
    #[serde(skip)]
    known_domains: Vec<String>,
}

impl RouteTracker {
    pub fn new(limits: RouteLimits) -> RouteTracker {
        RouteTracker {
            limits,
            domains: CappedHashMap::new(limits.max_domains),
            known_domains: Vec::new(),
        }
    }

    pub fn limits(&self) -> &RouteLimits {
        &self.limits
    }

    pub fn domains(&self) -> &CappedHashMap<String, DomainStats> {
        &self.domains
    }

    pub fn host(&self, domain: &str, host: &str) -> Option<&HostStats> {
        self.domains.get(domain).and_then(|d| d.hosts.get(host))
    }

    /// Drop everything, including registered routes
    pub fn clear(&mut self) {
        self.domains.clear();
        self.known_domains.clear();
    }

    fn add_known_domain(&mut self, domain: &str) {
        if !self.known_domains.iter().any(|d| d == domain) {
            self.known_domains.push(domain.to_string());
            self.known_domains
                .sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        }
    }

    /// Split a (lower-case) hostname into `(host, domain)`
    pub fn split_hostname(&self, hostname: &str) -> (String, String) {
        for domain in &self.known_domains {
            if hostname == domain {
                return (String::new(), domain.clone());
            }
            if let Some(host) = hostname
                .strip_suffix(domain.as_str())
                .and_then(|h| h.strip_suffix('.'))
            {
                return (host.to_string(), domain.clone());
            }
        }
        match hostname.split_once('.') {
            Some((host, domain)) => (host.to_string(), domain.to_string()),
            None => (hostname.to_string(), String::new()),
        }
    }

    pub fn parse_uri(&self, uri: &str) -> Result<ParsedUri, RouteError> {
        let parse_err = |reason: String| RouteError::UriParse {
            uri: uri.to_string(),
            reason,
        };
        // the router reports URIs with and without scheme
        let url = if uri.contains("://") {
            Url::parse(uri)
        } else {
            Url::parse(&format!("http://{}", uri))
        }
        .map_err(|e| parse_err(e.to_string()))?;
        let hostname = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| parse_err("no host".to_string()))?
            .to_ascii_lowercase();
        let (host, domain) = self.split_hostname(&hostname);
        Ok(ParsedUri {
            host,
            domain,
            path: normalize_path(url.path()),
            port: url.port(),
        })
    }

    fn host_mut(&mut self, domain: &str, host: &str) -> Result<&mut HostStats, RouteError> {
        let max_hosts = self.limits.max_hosts_per_domain;
        let domain_stats = self
            .domains
            .get_or_insert_with(domain.to_string(), || DomainStats::new(domain, max_hosts))
            .map_err(|e| RouteError::DomainLimit {
                domain: domain.to_string(),
                max: e.max_elements,
            })?;
        domain_stats
            .hosts
            .get_or_insert_with(host.to_string(), || HostStats::new(host))
            .map_err(|e| RouteError::HostLimit {
                domain: domain.to_string(),
                host: host.to_string(),
                max: e.max_elements,
            })
    }

    /// Register an HTTP route ahead of any traffic for it
    pub fn register_route(
        &mut self,
        domain: &str,
        host: &str,
        path: &str,
        route_id: &str,
    ) -> Result<(), RouteError> {
        let domain = domain.to_ascii_lowercase();
        let host = host.to_ascii_lowercase();
        self.add_known_domain(&domain);
        self.host_mut(&domain, &host)?
            .register_path(&normalize_path(path), Some(route_id.to_string()));
        Ok(())
    }

    /// Register a TCP route; TCP routes live on the domain itself (empty host)
    pub fn register_tcp_route(
        &mut self,
        domain: &str,
        port: u16,
        route_id: &str,
    ) -> Result<(), RouteError> {
        let domain = domain.to_ascii_lowercase();
        self.add_known_domain(&domain);
        self.host_mut(&domain, "")?
            .tcp_route_mut(port, Some(route_id.to_string()));
        Ok(())
    }

    /**
     * Find (or create) the stats of `app_id` on the route `uri` maps to.
     *
     * TCP routes are matched by exact port. HTTP paths use longest-prefix matching
     * against the host's registered paths; unmatched paths go to the root route.
     */
    pub fn resolve_route(
        &mut self,
        uri: &str,
        app_id: &str,
    ) -> Result<&mut AppRouteStats, RouteError> {
        let parsed = self.parse_uri(uri)?;
        let host = self.host_mut(&parsed.domain, &parsed.host)?;
        let route = match parsed.port {
            Some(port) if host.tcp_routes.contains_key(&port) => host.tcp_route_mut(port, None),
            _ => host.route_for_path_mut(&parsed.path),
        };
        Ok(route.app_mut(app_id))
    }

    /// Attribute one HTTP event to its route. Returns the number of user agent or
    /// forwarder keys that were refused because of their caps.
    pub fn track_http(
        &mut self,
        http: &HttpStartStop,
        app_id: &str,
        now: DateTime<Utc>,
    ) -> Result<usize, RouteError> {
        let limits = self.limits;
        let app_route = self.resolve_route(&http.uri, app_id)?;
        let method = app_route.method_mut(
            http.method.clone(),
            limits.max_user_agents,
            limits.max_forwarders,
        );
        Ok(method.record(
            http.status_code,
            http.request_bytes,
            http.content_length,
            http.user_agent.as_deref(),
            &http.forwarded,
            now,
        ))
    }

    /// All routes with their request counts, busiest first
    pub fn summaries(&self) -> Vec<RouteSummary> {
        let mut out = Vec::new();
        for (domain_name, domain) in self.domains.iter() {
            for (host_name, host) in domain.hosts.iter() {
                for (path, route) in &host.routes {
                    out.push(RouteSummary {
                        domain: domain_name.clone(),
                        host: host_name.clone(),
                        route: path.clone(),
                        route_id: route.route_id.clone(),
                        request_count: route.request_count(),
                    });
                }
                for (port, route) in &host.tcp_routes {
                    out.push(RouteSummary {
                        domain: domain_name.clone(),
                        host: host_name.clone(),
                        route: format!(":{}", port),
                        route_id: route.route_id.clone(),
                        request_count: route.request_count(),
                    });
                }
            }
        }
        out.into_iter()
            .sorted_by(|a, b| {
                b.request_count
                    .cmp(&a.request_count)
                    .then_with(|| {
                        (&a.domain, &a.host, &a.route).cmp(&(&b.domain, &b.host, &b.route))
                    })
            })
            .collect()
    }
}
