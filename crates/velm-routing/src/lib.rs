//! Route matching and request dispatch.
//!
//! Routes are matched in declared order against the request path; the first
//! exact match wins, falling back to the first partial match. No match means
//! "not handled", never an error. The dispatcher runs the matched route's
//! presenter through the filter pipeline.

pub mod route;
pub use route::{Route, RouteError, RouteSegment, RouteTable};

pub mod dispatcher;
pub use dispatcher::{
    PartialMatchHandler, Presenter, PresenterError, PresenterFilter, RequestContext,
    RoutingDispatcher, find_matching_route,
};
