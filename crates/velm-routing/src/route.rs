//! Route patterns and the route table.

use std::sync::Arc;

use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::dispatcher::Presenter;

#[derive(Debug, Error)]
pub enum RouteError {
    #[error("invalid route pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

#[derive(Clone, Debug, PartialEq)]
pub enum RouteSegment {
    Static(String),
    /// `{Name}`; optional parameters (`{Name?}`) may be omitted from the
    /// end of the URL.
    Parameter { name: String, optional: bool },
}

pub struct Route {
    pub route_name: String,
    pub url: String,
    pub segments: Vec<RouteSegment>,
    /// Markup file the route renders; `None` for custom presenters.
    pub virtual_path: Option<String>,
    pub default_parameters: FxHashMap<String, String>,
    /// Whether the route also matches URLs it is a strict prefix of.
    pub supports_partial_match: bool,
    pub presenter: Arc<dyn Presenter>,
}

impl Route {
    pub fn new(
        route_name: impl Into<String>,
        url: impl Into<String>,
        presenter: Arc<dyn Presenter>,
    ) -> Result<Self, RouteError> {
        let url = url.into();
        let mut segments = Vec::new();
        let mut seen_optional = false;
        for part in url.trim_matches('/').split('/').filter(|p| !p.is_empty()) {
            if let Some(inner) = part.strip_prefix('{').and_then(|p| p.strip_suffix('}')) {
                let (name, optional) = match inner.strip_suffix('?') {
                    Some(name) => (name, true),
                    None => (inner, false),
                };
                if name.is_empty() {
                    return Err(RouteError::InvalidPattern {
                        pattern: url.clone(),
                        reason: "parameter name is empty".to_string(),
                    });
                }
                if !optional && seen_optional {
                    return Err(RouteError::InvalidPattern {
                        pattern: url.clone(),
                        reason: "a required parameter cannot follow an optional one".to_string(),
                    });
                }
                seen_optional |= optional;
                segments.push(RouteSegment::Parameter { name: name.to_string(), optional });
            } else {
                if seen_optional {
                    return Err(RouteError::InvalidPattern {
                        pattern: url.clone(),
                        reason: "a static segment cannot follow an optional parameter".to_string(),
                    });
                }
                segments.push(RouteSegment::Static(part.to_string()));
            }
        }
        Ok(Route {
            route_name: route_name.into(),
            url,
            segments,
            virtual_path: None,
            default_parameters: FxHashMap::default(),
            supports_partial_match: false,
            presenter,
        })
    }

    pub fn with_virtual_path(mut self, path: impl Into<String>) -> Self {
        self.virtual_path = Some(path.into());
        self
    }

    pub fn with_default(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.default_parameters.insert(name.into(), value.into());
        self
    }

    pub fn with_partial_match(mut self) -> Self {
        self.supports_partial_match = true;
        self
    }

    /// Exact match against a trimmed URL; returns the extracted parameters
    /// (with defaults applied) on success.
    pub fn is_match(&self, url: &str) -> Option<FxHashMap<String, String>> {
        let parts: Vec<&str> = url.split('/').filter(|p| !p.is_empty()).collect();
        self.match_segments(&parts, false)
    }

    /// Prefix match: the route is fully consumed and the URL has extra
    /// segments left. Only routes opted into partial matching participate.
    pub fn is_partial_match(&self, url: &str) -> Option<FxHashMap<String, String>> {
        if !self.supports_partial_match {
            return None;
        }
        let parts: Vec<&str> = url.split('/').filter(|p| !p.is_empty()).collect();
        if parts.len() <= self.segments.len() {
            return None;
        }
        self.match_segments(&parts[..self.segments.len()], true)
    }

    fn match_segments(&self, parts: &[&str], prefix: bool) -> Option<FxHashMap<String, String>> {
        let required = self
            .segments
            .iter()
            .filter(|s| !matches!(s, RouteSegment::Parameter { optional: true, .. }))
            .count();
        if parts.len() < required || parts.len() > self.segments.len() {
            return None;
        }
        // A prefix match consumed exactly segments.len() parts.
        if prefix && parts.len() != self.segments.len() {
            return None;
        }

        let mut parameters = self.default_parameters.clone();
        for (i, segment) in self.segments.iter().enumerate() {
            match (segment, parts.get(i)) {
                (RouteSegment::Static(expected), Some(actual)) => {
                    if !expected.eq_ignore_ascii_case(actual) {
                        return None;
                    }
                }
                (RouteSegment::Static(_), None) => return None,
                (RouteSegment::Parameter { name, .. }, Some(actual)) => {
                    parameters.insert(name.clone(), (*actual).to_string());
                }
                (RouteSegment::Parameter { optional, .. }, None) => {
                    if !optional {
                        return None;
                    }
                }
            }
        }
        Some(parameters)
    }
}

/// Routes in declared order, plus the handlers consulted on partial matches.
#[derive(Default)]
pub struct RouteTable {
    routes: Vec<Arc<Route>>,
    pub partial_match_handlers: Vec<Arc<dyn crate::dispatcher::PartialMatchHandler>>,
}

impl RouteTable {
    pub fn new() -> Self {
        RouteTable::default()
    }

    pub fn add(&mut self, route: Route) {
        self.routes.push(Arc::new(route));
    }

    pub fn routes(&self) -> &[Arc<Route>] {
        &self.routes
    }
}
