//! Router module
//!
//! Path-based routing with per-route and global middleware, served through axum.
//! It provides:
//!
//! - Method + path pattern routing (`/foo/:id`) with extracted parameters
//! - Global pre-middleware (may short-circuit with a response) and post-middleware
//! - A request-scoped database connection handed to every handler
//! - Conversion of handler errors into HTTP 500 pages

use crate::error::Error;
use crate::orm::RequestConnection;
use crate::settings::Settings;
use crate::template::{Context, Templates, escape_html};
use axum::Router as AxumRouter;
use axum::body::{Body, Bytes};
use axum::extract::{DefaultBodyLimit, FromRequest, Multipart};
use axum::http::header::CONTENT_TYPE;
use axum::http::{Extensions, HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use axum::response::IntoResponse;
use futures::future::BoxFuture;
use log::{error, info, warn};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;

/// Process-wide state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub settings: Settings,
    pub templates: Templates,
}

impl AppState {
    pub fn new(settings: Settings) -> Self {
        let templates = Templates::new(&settings.template.dir, settings.template.debug);
        AppState {
            settings,
            templates,
        }
    }

    /// A fresh, not yet opened, connection for one request.
    pub fn request_connection(&self) -> RequestConnection {
        RequestConnection::new(self.settings.connect_options())
    }

    /// Render `name` into a 200 HTML response.
    pub fn render(&self, name: &str, context: &Context) -> Result<Response, Error> {
        Ok(Response::html(self.templates.render(name, context)?))
    }
}

/// Represents the outcome of an HTTP handler.
#[derive(Debug)]
pub struct Response {
    pub status_code: u16,
    pub body: String,
    pub headers: HashMap<String, String>,
}

impl Response {
    pub fn new(status_code: u16, body: impl Into<String>) -> Self {
        Response {
            status_code,
            body: body.into(),
            headers: HashMap::new(),
        }
    }

    /// HTTP 200 with a plain body and no headers.
    pub fn ok(body: impl Into<String>) -> Self {
        Response::new(200, body)
    }

    /// HTTP 200 with an HTML content type.
    pub fn html(body: impl Into<String>) -> Self {
        let mut response = Response::ok(body);
        response.headers.insert(
            "Content-Type".to_string(),
            "text/html; charset=utf-8".to_string(),
        );
        response
    }

    pub fn not_found() -> Self {
        Response::new(404, "404 Not Found")
    }

    pub fn method_not_allowed() -> Self {
        Response::new(405, "405 Method Not Allowed")
    }

    pub fn payload_too_large() -> Self {
        Response::new(413, "413 Payload Too Large")
    }

    pub fn internal_error() -> Self {
        Response::new(500, "500 Internal Server Error")
    }
}

impl Response {
    /// HTTP 500 for a failed handler. In debug mode the error text is shown on the page.
    pub fn server_error(e: &Error, debug: bool) -> Self {
        error!("Request failed: {}", e);
        if debug {
            let mut response = Response::html(format!(
                "<h1>500 Internal Server Error</h1><pre>{}</pre>",
                escape_html(&e.to_string())
            ));
            response.status_code = 500;
            response
        } else {
            Response::internal_error()
        }
    }
}

impl From<Error> for Response {
    fn from(e: Error) -> Self {
        Response::server_error(&e, false)
    }
}

impl IntoResponse for Response {
    fn into_response(self) -> axum::response::Response {
        let status =
            StatusCode::from_u16(self.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut headers = HeaderMap::new();
        for (key, value) in self.headers {
            match (
                HeaderName::from_bytes(key.as_bytes()),
                HeaderValue::from_str(&value),
            ) {
                (Ok(name), Ok(value)) => {
                    headers.insert(name, value);
                }
                _ => warn!("Dropping invalid response header"),
            }
        }
        (status, headers, self.body).into_response()
    }
}

/// Maps status codes to HTTP status text.
pub fn status_text(code: u16) -> &'static str {
    StatusCode::from_u16(code)
        .ok()
        .and_then(|status| status.canonical_reason())
        .unwrap_or("Unknown")
}

/// An incoming request as seen by a handler. Owns the request's database connection,
/// so the connection is released as soon as the handler is done with the request.
pub struct Request {
    pub method: Method,
    pub path: String,
    pub params: HashMap<String, String>,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// Extensions of the incoming request, including the body limit set in [`Router::into_axum`].
    pub extensions: Extensions,
    pub db: RequestConnection,
}

impl Request {
    /// The body as multipart form data, or `None` if it was not sent as multipart.
    pub async fn multipart(&mut self) -> Option<Multipart> {
        let content_type = self.headers.get(CONTENT_TYPE)?.clone();
        let mut request = axum::http::Request::builder()
            .header(CONTENT_TYPE, content_type)
            .body(Body::from(std::mem::take(&mut self.body)))
            .ok()?;
        *request.extensions_mut() = std::mem::take(&mut self.extensions);
        Multipart::from_request(request, &()).await.ok()
    }
}

/// Metadata about the current request, visible to middleware.
pub struct RequestContext {
    pub method: Method,
    pub path: String,
    pub params: HashMap<String, String>,
    pub start_time: Option<Instant>,
}

pub type HandlerFuture = BoxFuture<'static, Result<Response, Error>>;

pub type Handler = Arc<dyn Fn(Request, AppState) -> HandlerFuture + Send + Sync>;

/// Wrap an async fn `(Request, AppState) -> Result<Response, Error>` as a [`Handler`].
pub fn handler<F, Fut>(f: F) -> Handler
where
    F: Fn(Request, AppState) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Response, Error>> + Send + 'static,
{
    Arc::new(move |request: Request, state: AppState| -> HandlerFuture {
        Box::pin(f(request, state))
    })
}

/// Runs before the handler. Returning Some(Response) stops the request there.
pub type Middleware = Arc<dyn Fn(&mut RequestContext) -> Option<Response> + Send + Sync>;

/// Runs after the handler and may inspect or replace the response.
pub type PostMiddleware = Arc<dyn Fn(&RequestContext, Response) -> Response + Send + Sync>;

#[derive(Clone)]
pub struct Route {
    pub method: Method,
    pub path_pattern: String,
    pub handler: Handler,
    pub middlewares: Vec<Middleware>,
}

/// Outcome of looking a request up in the route table.
pub enum Resolution<'a> {
    Found(&'a Route, HashMap<String, String>),
    MethodNotAllowed,
    NotFound,
}

#[derive(Clone, Default)]
pub struct Router {
    pub routes: Vec<Route>,
    pub middlewares: Vec<Middleware>,
    pub post_middlewares: Vec<PostMiddleware>,
}

impl Router {
    pub fn new() -> Self {
        Router::default()
    }

    /// Register a route with its handler and any route-specific middleware.
    pub fn add_route(
        &mut self,
        method: Method,
        path_pattern: &str,
        handler: Handler,
        middlewares: Vec<Middleware>,
    ) {
        self.routes.push(Route {
            method,
            path_pattern: path_pattern.to_string(),
            handler,
            middlewares,
        });
    }

    pub fn add_middleware(&mut self, middleware: Middleware) {
        self.middlewares.push(middleware);
    }

    pub fn add_post_middleware(&mut self, middleware: PostMiddleware) {
        self.post_middlewares.push(middleware);
    }

    /// Find the route for `method` and `path`.
    pub fn resolve(&self, method: &Method, path: &str) -> Resolution<'_> {
        let mut path_known = false;
        for route in &self.routes {
            if let Some(params) = match_path(&route.path_pattern, path) {
                if &route.method == method {
                    return Resolution::Found(route, params);
                }
                path_known = true;
            }
        }
        if path_known {
            Resolution::MethodNotAllowed
        } else {
            Resolution::NotFound
        }
    }

    /// Route one request through middleware and its handler.
    pub async fn dispatch(&self, request: axum::extract::Request, state: AppState) -> Response {
        let (parts, body) = request.into_parts();
        let mut ctx = RequestContext {
            method: parts.method,
            path: parts.uri.path().to_string(),
            params: HashMap::new(),
            start_time: None,
        };

        let mut response = self
            .handle(&mut ctx, parts.headers, parts.extensions, body, state)
            .await;
        for post_middleware in &self.post_middlewares {
            response = (post_middleware)(&ctx, response);
        }
        response
    }

    async fn handle(
        &self,
        ctx: &mut RequestContext,
        headers: HeaderMap,
        extensions: Extensions,
        body: Body,
        state: AppState,
    ) -> Response {
        for middleware in &self.middlewares {
            if let Some(response) = (middleware)(&mut *ctx) {
                return response;
            }
        }

        let (route, params) = match self.resolve(&ctx.method, &ctx.path) {
            Resolution::Found(route, params) => (route, params),
            Resolution::MethodNotAllowed => return Response::method_not_allowed(),
            Resolution::NotFound => return Response::not_found(),
        };
        ctx.params = params;

        for middleware in &route.middlewares {
            if let Some(response) = (middleware)(&mut *ctx) {
                return response;
            }
        }

        let body = match axum::body::to_bytes(body, state.settings.upload_limit).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Rejecting request body for {}: {}", ctx.path, e);
                return Response::payload_too_large();
            }
        };

        let request = Request {
            method: ctx.method.clone(),
            path: ctx.path.clone(),
            params: ctx.params.clone(),
            headers,
            body,
            extensions,
            db: state.request_connection(),
        };
        let debug = state.settings.debug;
        match (route.handler)(request, state).await {
            Ok(response) => response,
            Err(e) => Response::server_error(&e, debug),
        }
    }

    /// Serve every route through a single axum fallback. The configured upload limit
    /// also applies to multipart parsing inside handlers.
    pub fn into_axum(self, state: AppState) -> AxumRouter {
        let router = Arc::new(self);
        let upload_limit = state.settings.upload_limit;
        AxumRouter::new()
            .fallback(move |request: axum::extract::Request| {
                let router = router.clone();
                let state = state.clone();
                async move { router.dispatch(request, state).await }
            })
            .layer(DefaultBodyLimit::max(upload_limit))
    }

    /// Bind to the configured address and serve until the process stops.
    pub async fn run(
        self,
        settings: Settings,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let addr = settings.addr();
        let app = self.into_axum(AppState::new(settings));
        let listener = TcpListener::bind(&addr).await?;
        info!("HTTP server running on http://{}", addr);
        axum::serve(listener, app).await?;
        Ok(())
    }
}

/// Stamps the request start time.
pub fn start_timer() -> Middleware {
    Arc::new(|ctx: &mut RequestContext| {
        ctx.start_time = Some(Instant::now());
        None
    })
}

/// Logs method, path, status and elapsed time of every request.
pub fn access_log() -> PostMiddleware {
    Arc::new(|ctx: &RequestContext, response: Response| {
        let elapsed = ctx
            .start_time
            .map(|t| format!("{:.2?}", t.elapsed()))
            .unwrap_or_else(|| "-".to_string());
        info!(
            "{} {} -> {} {} ({})",
            ctx.method,
            ctx.path,
            response.status_code,
            status_text(response.status_code),
            elapsed
        );
        response
    })
}

#[macro_export]
macro_rules! route {
    ($router:expr, $( $method:ident $path:expr => { $handler:expr $(, $middleware:expr )* } ),* $(,)?) => {
        $(
            $router.add_route(
                ::axum::http::Method::$method,
                $path,
                $crate::router::handler($handler),
                vec![$($middleware),*]
            );
        )*
    };
}

/// Matches a path pattern (e.g. `/foo/:id`) against a real path,
/// extracting parameters into a HashMap if matched, or None if not.
pub fn match_path(pattern: &str, path: &str) -> Option<HashMap<String, String>> {
    let pattern_parts: Vec<&str> = pattern.trim_matches('/').split('/').collect();
    let path_parts: Vec<&str> = path.trim_matches('/').split('/').collect();

    if pattern_parts.len() != path_parts.len() {
        return None;
    }

    let mut params = HashMap::new();
    for (p, a) in pattern_parts.iter().zip(path_parts.iter()) {
        if let Some(name) = p.strip_prefix(':') {
            params.insert(name.to_string(), a.to_string());
        } else if p != a {
            return None;
        }
    }
    Some(params)
}
