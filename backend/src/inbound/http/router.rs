//! Route registration and the actix handler that drives a [`Pipeline`].
//!
//! The handler turns the actix request into an [`InboundRequest`], builds the
//! [`RequestContext`] (trace from the [`Trace`](super::Trace) middleware,
//! request deadline, cancellation tied to the server's abort token), runs the
//! pipeline and renders the envelope as JSON with `status = code`.

use std::collections::HashMap;
use std::sync::Arc;

use actix_web::http::{Method, StatusCode, header};
use actix_web::{HttpMessage, HttpRequest, HttpResponse, web};
use tokio::time::Instant;

use super::middleware::Middleware;
use super::pipeline::Pipeline;
use super::state::HttpState;
use crate::domain::{InboundRequest, RequestContext, Response, UseCase};
use crate::telemetry::TraceContext;

/// Content type of every envelope.
pub const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";

/// Routes registered with the HTTP ingress.
///
/// # Examples
/// ```
/// use std::sync::Arc;
/// use actix_web::http::Method;
/// use async_trait::async_trait;
/// use serde_json::json;
/// use skeleton::domain::{RequestContext, Response, UseCase};
/// use skeleton::inbound::http::Router;
///
/// struct ListThings;
///
/// #[async_trait]
/// impl UseCase for ListThings {
///     fn name(&self) -> &'static str { "UseCase.ListThings" }
///     async fn serve(&self, _ctx: &mut RequestContext) -> Response {
///         Response::ok(json!([{ "id": 1 }]))
///     }
/// }
///
/// let mut router = Router::default();
/// router.route(Method::GET, "/things", Arc::new(ListThings), Vec::new());
/// assert_eq!(router.len(), 1);
/// ```
#[derive(Debug, Clone, Default)]
pub struct Router {
    routes: Vec<(Method, Arc<Pipeline>)>,
}

impl Router {
    /// Register `usecase` behind `middlewares` for `method` on `pattern`.
    ///
    /// Patterns use actix syntax, e.g. `/users/{id}`.
    pub fn route(
        &mut self,
        method: Method,
        pattern: impl Into<String>,
        usecase: Arc<dyn UseCase>,
        middlewares: Vec<Arc<dyn Middleware>>,
    ) -> &mut Self {
        let pipeline = Pipeline::new(method.as_str(), pattern, usecase, middlewares);
        self.routes.push((method, Arc::new(pipeline)));
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Mount every route on an actix app.
    pub fn configure(&self, cfg: &mut web::ServiceConfig) {
        for (method, pipeline) in &self.routes {
            let pattern = pipeline.pattern().to_owned();
            let pipeline = Arc::clone(pipeline);
            let handler = move |req: HttpRequest, body: web::Bytes, state: web::Data<HttpState>| {
                let pipeline = Arc::clone(&pipeline);
                async move { dispatch(&pipeline, &req, body, &state).await }
            };
            cfg.route(&pattern, web::method(method.clone()).to(handler));
        }
    }
}

async fn dispatch(
    pipeline: &Pipeline,
    req: &HttpRequest,
    body: web::Bytes,
    state: &HttpState,
) -> HttpResponse {
    let _in_flight = state.in_flight.enter();
    let trace = req
        .extensions()
        .get::<TraceContext>()
        .cloned()
        .or_else(TraceContext::current)
        .unwrap_or_else(TraceContext::new_root);
    let request = inbound_request(req, pipeline.pattern(), body);
    let mut ctx = RequestContext::new(request, Arc::clone(&state.config))
        .with_trace(trace)
        .with_tracer(state.tracer.clone())
        .with_cancellation(state.abort.child_token())
        .with_deadline(Instant::now() + state.config.app.request_timeout);
    let response = pipeline.run(&mut ctx).await;
    render(&response)
}

/// Transport-neutral copy of an actix request.
fn inbound_request(req: &HttpRequest, pattern: &str, body: web::Bytes) -> InboundRequest {
    let params = req
        .match_info()
        .iter()
        .map(|(name, value)| (name.to_owned(), value.to_owned()))
        .collect();
    let query = web::Query::<HashMap<String, String>>::from_query(req.query_string())
        .map(web::Query::into_inner)
        .unwrap_or_default();
    let headers = req
        .headers()
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|value| (name.as_str().to_owned(), value.to_owned()))
        })
        .collect();
    InboundRequest {
        method: req.method().as_str().to_owned(),
        path: req.path().to_owned(),
        route: pattern.to_owned(),
        params,
        query,
        headers,
        peer_ip: req.peer_addr().map(|addr| addr.ip()),
        body,
    }
}

/// Write the envelope with `status = code`, or 200 when the code is 0.
#[must_use]
pub fn render(response: &Response) -> HttpResponse {
    let status =
        StatusCode::from_u16(response.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    match serde_json::to_vec(response) {
        Ok(body) => HttpResponse::build(status)
            .insert_header((header::CONTENT_TYPE, JSON_CONTENT_TYPE))
            .body(body),
        Err(err) => {
            tracing::error!(error = %err, "failed to serialise response envelope");
            HttpResponse::InternalServerError()
                .insert_header((header::CONTENT_TYPE, JSON_CONTENT_TYPE))
                .body(r#"{"code":500,"status":false,"errors":"Internal server error"}"#)
        }
    }
}

#[cfg(test)]
mod tests {
    use actix_web::{App, test as actix_test};
    use async_trait::async_trait;
    use serde_json::{Value, json};
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::config::Config;
    use crate::domain::{Envelope, MiddlewareOutcome};
    use crate::inbound::http::middleware::BearerAuth;
    use crate::telemetry::Tracer;

    /// Echoes what the handler saw of the request.
    struct Inspect;

    #[async_trait]
    impl UseCase for Inspect {
        fn name(&self) -> &'static str {
            "UseCase.Inspect"
        }

        async fn serve(&self, ctx: &mut RequestContext) -> Response {
            let request = ctx.request();
            Response::ok(json!({
                "method": request.method,
                "path": request.path,
                "route": request.route,
                "id": request.param("id"),
                "q": request.query_param("q"),
                "header": request.header("X-Custom"),
                "body": String::from_utf8_lossy(&request.body),
                "token": ctx.local_str("token"),
                "has_deadline": ctx.deadline().is_some(),
            }))
        }
    }

    struct Status(u16);

    #[async_trait]
    impl UseCase for Status {
        fn name(&self) -> &'static str {
            "UseCase.Status"
        }

        async fn serve(&self, _ctx: &mut RequestContext) -> Response {
            Response::success(self.0, Value::Null)
        }
    }

    struct Deny;

    #[async_trait]
    impl Middleware for Deny {
        fn name(&self) -> &'static str {
            "Middleware.Deny"
        }

        async fn handle(&self, _ctx: &mut RequestContext) -> MiddlewareOutcome {
            MiddlewareOutcome::reject(418, "teapot")
        }
    }

    fn state() -> web::Data<HttpState> {
        web::Data::new(HttpState::new(
            Arc::new(Config::default()),
            Tracer::default(),
            CancellationToken::new(),
        ))
    }

    #[actix_web::test]
    async fn handler_sees_params_query_headers_and_body() {
        let mut router = Router::default();
        router.route(
            Method::POST,
            "/things/{id}",
            Arc::new(Inspect),
            vec![Arc::new(BearerAuth::new(["t"]))],
        );
        let app = actix_test::init_service(
            App::new()
                .app_data(state())
                .configure(|cfg| router.configure(cfg)),
        )
        .await;

        let req = actix_test::TestRequest::post()
            .uri("/things/7?q=a%20b")
            .insert_header(("Authorization", "Bearer t"))
            .insert_header(("X-Custom", "yes"))
            .set_payload("hello")
            .to_request();
        let res = actix_test::call_service(&app, req).await;

        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(
            res.headers()
                .get(header::CONTENT_TYPE)
                .and_then(|value| value.to_str().ok()),
            Some(JSON_CONTENT_TYPE)
        );
        let body: Value = actix_test::read_body_json(res).await;
        assert_eq!(body["code"], json!(200));
        assert_eq!(body["status"], json!(true));
        assert_eq!(
            body["data"],
            json!({
                "method": "POST",
                "path": "/things/7",
                "route": "/things/{id}",
                "id": "7",
                "q": "a b",
                "header": "yes",
                "body": "hello",
                "token": "t",
                "has_deadline": true,
            })
        );
    }

    #[actix_web::test]
    async fn rejections_render_with_their_code() {
        let mut router = Router::default();
        router.route(Method::GET, "/brew", Arc::new(Inspect), vec![Arc::new(Deny)]);
        let app = actix_test::init_service(
            App::new()
                .app_data(state())
                .configure(|cfg| router.configure(cfg)),
        )
        .await;

        let req = actix_test::TestRequest::get().uri("/brew").to_request();
        let res = actix_test::call_service(&app, req).await;

        assert_eq!(res.status().as_u16(), 418);
        let body: Value = actix_test::read_body_json(res).await;
        assert_eq!(body["errors"], json!("teapot"));
        assert_eq!(body["status"], json!(false));
        assert!(body.get("data").is_none());
    }

    #[actix_web::test]
    async fn zero_codes_are_sent_as_200() {
        let mut router = Router::default();
        router
            .route(Method::GET, "/zero", Arc::new(Status(0)), Vec::new())
            .route(Method::GET, "/created", Arc::new(Status(201)), Vec::new());
        let app = actix_test::init_service(
            App::new()
                .app_data(state())
                .configure(|cfg| router.configure(cfg)),
        )
        .await;

        let zero = actix_test::call_service(
            &app,
            actix_test::TestRequest::get().uri("/zero").to_request(),
        )
        .await;
        assert_eq!(zero.status(), StatusCode::OK);
        let created = actix_test::call_service(
            &app,
            actix_test::TestRequest::get().uri("/created").to_request(),
        )
        .await;
        assert_eq!(created.status(), StatusCode::CREATED);
    }

    #[actix_web::test]
    async fn methods_are_matched() {
        let mut router = Router::default();
        router.route(Method::GET, "/only-get", Arc::new(Status(200)), Vec::new());
        let app = actix_test::init_service(
            App::new()
                .app_data(state())
                .configure(|cfg| router.configure(cfg)),
        )
        .await;

        let res = actix_test::call_service(
            &app,
            actix_test::TestRequest::post().uri("/only-get").to_request(),
        )
        .await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }
}
