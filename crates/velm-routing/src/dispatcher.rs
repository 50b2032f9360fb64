//! The routing dispatcher.
//!
//! Finds the matching route (exact first, then the first partial match,
//! honoring the googlebot escaped-fragment URL source and the SPA prefix)
//! and runs the request through the presenter filter pipeline. "Not
//! handled" is a normal outcome reported as `Ok(false)`.

use std::sync::Arc;

use rustc_hash::FxHashMap;
use thiserror::Error;
use tracing::debug;

use velm_common::BoxFuture;
use velm_common::services::ServiceProvider;

use crate::route::{Route, RouteTable};

const GOOGLEBOT_ESCAPED_FRAGMENT: &str = "_escaped_fragment_=";
const SPA_URL_IDENTIFIER: &str = "___velm-spa___";

#[derive(Debug, Error)]
pub enum PresenterError {
    /// The response has already been generated; the pipeline stops quietly.
    #[error("request execution was interrupted")]
    Interrupt,
    /// An HTTP-level failure the hosting layer should map to a status code.
    #[error("http error {status}: {message}")]
    Http { status: u16, message: String },
    #[error("{0}")]
    Other(String),
}

/// Per-request state threaded through the dispatcher.
pub struct RequestContext {
    pub path: String,
    pub query: String,
    pub route_name: Option<String>,
    pub parameters: FxHashMap<String, String>,
    pub is_partial_match: bool,
    pub services: ServiceProvider,
    /// Set by an exception filter to mark the error as handled.
    pub is_page_exception_handled: bool,
}

impl RequestContext {
    pub fn new(path: impl Into<String>, query: impl Into<String>) -> Self {
        RequestContext {
            path: path.into(),
            query: query.into(),
            route_name: None,
            parameters: FxHashMap::default(),
            is_partial_match: false,
            services: ServiceProvider::new(),
            is_page_exception_handled: false,
        }
    }
}

pub trait Presenter: Send + Sync {
    fn process_request<'a>(
        &'a self,
        context: &'a mut RequestContext,
    ) -> BoxFuture<'a, Result<(), PresenterError>>;
}

/// Hooks around presenter execution; all default to no-ops.
pub trait PresenterFilter: Send + Sync {
    fn on_presenter_executing<'a>(
        &'a self,
        _context: &'a mut RequestContext,
    ) -> BoxFuture<'a, Result<(), PresenterError>> {
        Box::pin(async { Ok(()) })
    }

    fn on_presenter_executed<'a>(
        &'a self,
        _context: &'a mut RequestContext,
    ) -> BoxFuture<'a, Result<(), PresenterError>> {
        Box::pin(async { Ok(()) })
    }

    fn on_presenter_exception<'a>(
        &'a self,
        _context: &'a mut RequestContext,
        _error: &'a PresenterError,
    ) -> BoxFuture<'a, Result<(), PresenterError>> {
        Box::pin(async { Ok(()) })
    }
}

/// Consulted in order when a request only partially matched a route; the
/// first handler that returns `true` stops the chain.
pub trait PartialMatchHandler: Send + Sync {
    fn try_handle_partial_match(&self, context: &mut RequestContext) -> bool;
}

/// Recognizes requests made by crawlers through the AJAX escaped-fragment
/// convention; the fragment then replaces the path as the URL source.
fn try_parse_googlebot_escaped_fragment(query: &str) -> Option<&str> {
    query.strip_prefix(GOOGLEBOT_ESCAPED_FRAGMENT)
}

/// Finds the matching route: first exact match in declared order wins, the
/// first partial match is the fallback. `None` means not handled.
pub fn find_matching_route<'a>(
    routes: &'a [Arc<Route>],
    path: &str,
    query: &str,
) -> Option<(&'a Arc<Route>, FxHashMap<String, String>, bool)> {
    let url = try_parse_googlebot_escaped_fragment(query).unwrap_or(path);
    let mut url = url.trim_matches('/');

    // remove the SPA identifier from the URL
    if let Some(rest) = url.strip_prefix(SPA_URL_IDENTIFIER) {
        url = rest.trim_matches('/');
    }

    let mut partial: Option<(&Arc<Route>, FxHashMap<String, String>)> = None;
    for route in routes {
        if let Some(parameters) = route.is_match(url) {
            return Some((route, parameters, false));
        }
        if partial.is_none() {
            if let Some(parameters) = route.is_partial_match(url) {
                partial = Some((route, parameters));
            }
        }
    }

    partial.map(|(route, parameters)| (route, parameters, true))
}

pub struct RoutingDispatcher {
    route_table: RouteTable,
    global_filters: Vec<Arc<dyn PresenterFilter>>,
}

impl RoutingDispatcher {
    pub fn new(route_table: RouteTable) -> Self {
        RoutingDispatcher { route_table, global_filters: Vec::new() }
    }

    pub fn add_global_filter(&mut self, filter: Arc<dyn PresenterFilter>) {
        self.global_filters.push(filter);
    }

    /// Dispatches one request. `Ok(false)` means no route matched and the
    /// request was not handled; errors other than interruptions propagate to
    /// the hosting layer's generic error handling.
    pub async fn handle(&self, context: &mut RequestContext) -> Result<bool, PresenterError> {
        let Some((route, parameters, is_partial_match)) =
            find_matching_route(self.route_table.routes(), &context.path, &context.query)
        else {
            return Ok(false);
        };

        debug!(route = %route.route_name, is_partial_match, "request matched route");
        context.route_name = Some(route.route_name.clone());
        context.parameters = parameters;
        context.is_partial_match = is_partial_match;
        let presenter = route.presenter.clone();

        match self.run_pipeline(&presenter, context).await {
            Ok(()) => Ok(true),
            // the response has already been generated, do nothing
            Err(PresenterError::Interrupt) => Ok(true),
            Err(error) => {
                for filter in &self.global_filters {
                    filter.on_presenter_exception(context, &error).await?;
                }
                if context.is_page_exception_handled {
                    return Ok(true);
                }
                Err(error)
            }
        }
    }

    async fn run_pipeline(
        &self,
        presenter: &Arc<dyn Presenter>,
        context: &mut RequestContext,
    ) -> Result<(), PresenterError> {
        for filter in &self.global_filters {
            filter.on_presenter_executing(context).await?;
        }

        if context.is_partial_match {
            for handler in &self.route_table.partial_match_handlers {
                if handler.try_handle_partial_match(context) {
                    break;
                }
            }
        }

        presenter.process_request(context).await?;

        for filter in &self.global_filters {
            filter.on_presenter_executed(context).await?;
        }
        Ok(())
    }
}
