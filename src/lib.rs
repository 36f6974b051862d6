pub mod app;
pub mod auth;
pub mod cache;
pub mod config;
pub mod controller;
pub mod error_handler;
pub mod exception;
pub mod param;
pub mod request;
pub mod response;
pub mod router;
pub mod template;
pub mod util;
pub mod validation;

pub use app::{AppContext, RequestContext};
pub use cache::ContentCache;
pub use config::Config;
pub use controller::{Controller, ControllerBase, ControllerRegistry, Registration, Step, View};
pub use exception::Exception;
pub use param::{HttpEncoding, HttpRequestMethod, HttpVersion};
pub use request::Request;
pub use response::Response;
pub use router::{RerouteTable, Route, RouteId, Router};
pub use template::{Compiler, Template, TemplateEnv};
pub use util::HtmlBuilder;
