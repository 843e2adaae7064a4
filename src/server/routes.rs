//! Route dispatch
//!
//! | Method      | Path                  | Action                          |
//! |-------------|-----------------------|---------------------------------|
//! | `GET`       | `/`                   | usage text                      |
//! | `POST`      | `/g/-/new`            | create a bin                    |
//! | `GET, POST` | `/g/<key>`            | capture the request             |
//! | `GET`       | `/g/<key>/history`    | history as a JSON array         |
//! | `GET`       | `/g/<key>/reqevents`  | history + live tail as SSE      |

use std::time::{Duration, SystemTime};

use bytes::Bytes;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Body;
use hyper::header::{self, HeaderMap, HeaderValue};
use hyper::http::request::Parts;
use hyper::{Method, Request, Response, StatusCode};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::event::RequestEvent;
use crate::key::BinKey;
use crate::record::RequestRecord;
use crate::service::BinService;
use crate::{ReqbinError, Result};

use super::sse::event_stream;
use super::ResponseBody;

const USAGE: &str = "reqbin: disposable request bins\n\
\n\
POST /g/-/new            create a bin\n\
GET  /g/<key>            capture a request (POST too)\n\
GET  /g/<key>/history    recent requests as JSON\n\
GET  /g/<key>/reqevents  recent + live requests as server-sent events\n";

/// A parsed request path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route<'a> {
    /// `/`
    Index,
    /// `/g/-/new`
    NewBin,
    /// `/g/<key>`
    Capture(&'a str),
    /// `/g/<key>/history`
    History(&'a str),
    /// `/g/<key>/reqevents`
    Events(&'a str),
    /// Anything else
    NotFound,
}

impl<'a> Route<'a> {
    /// Classify a request path
    #[must_use]
    pub fn parse(path: &'a str) -> Self {
        let segments: Vec<&str> = path.trim_matches('/').split('/').collect();

        match segments.as_slice() {
            [""] => Route::Index,
            ["g", "-", "new"] => Route::NewBin,
            ["g", key] if !key.is_empty() => Route::Capture(key),
            ["g", key, "history"] if !key.is_empty() => Route::History(key),
            ["g", key, "reqevents"] if !key.is_empty() => Route::Events(key),
            _ => Route::NotFound,
        }
    }

    fn allows(self, method: &Method) -> bool {
        match self {
            Route::NewBin => method == Method::POST,
            Route::Capture(_) => method == Method::GET || method == Method::POST,
            Route::Index | Route::History(_) | Route::Events(_) => method == Method::GET,
            Route::NotFound => true,
        }
    }

    fn allow_header(self) -> &'static str {
        match self {
            Route::NewBin => "POST",
            Route::Capture(_) => "GET, POST",
            _ => "GET",
        }
    }
}

/// Maps HTTP requests onto service operations
#[derive(Clone)]
pub struct Router {
    service: BinService,
    display_body_chars: usize,
    keepalive: Duration,
    shutdown: CancellationToken,
}

impl Router {
    /// Create a router
    #[must_use]
    pub fn new(
        service: BinService,
        display_body_chars: usize,
        keepalive: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            service,
            display_body_chars,
            keepalive,
            shutdown,
        }
    }

    /// Handle one request; failures become error responses
    pub async fn handle<B>(&self, request: Request<B>) -> Response<ResponseBody>
    where
        B: Body,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let method = request.method().clone();
        let path = request.uri().path().to_string();
        let route = Route::parse(&path);

        if !route.allows(&method) {
            let mut response = text_response(StatusCode::METHOD_NOT_ALLOWED, "method not allowed\n");
            response
                .headers_mut()
                .insert(header::ALLOW, HeaderValue::from_static(route.allow_header()));
            return response;
        }

        let result = match route {
            Route::Index => Ok(text_response(StatusCode::OK, USAGE)),
            Route::NewBin => self.create_bin(),
            Route::Capture(key) => self.capture(BinKey::new(key), request).await,
            Route::History(key) => self.history(&BinKey::new(key)),
            Route::Events(key) => self.events(&BinKey::new(key)),
            Route::NotFound => Ok(text_response(StatusCode::NOT_FOUND, "not found\n")),
        };

        result.unwrap_or_else(|e| {
            debug!(%method, %path, "Request failed: {}", e);
            error_response(&e)
        })
    }

    fn create_bin(&self) -> Result<Response<ResponseBody>> {
        let key = self.service.create_bin()?;
        let location = HeaderValue::from_str(&format!("/g/{key}"))
            .map_err(|e| ReqbinError::Other(format!("Invalid location header: {e}")))?;

        let body = serde_json::to_vec(&serde_json::json!({ "key": key }))?;
        let mut response = json_response(StatusCode::CREATED, body);
        response.headers_mut().insert(header::LOCATION, location);
        Ok(response)
    }

    async fn capture<B>(&self, key: BinKey, request: Request<B>) -> Result<Response<ResponseBody>>
    where
        B: Body,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let timestamp = SystemTime::now();

        // Reject before reading a body nobody will keep
        if !self.service.contains(&key) {
            return Err(ReqbinError::BinNotFound(key));
        }

        let limit = self.service.max_body_size();
        check_content_length(request.headers(), limit)?;

        let (parts, body) = request.into_parts();
        let body = read_body(body, limit).await?;

        let record = RequestRecord {
            timestamp,
            method: parts.method.to_string(),
            url: absolute_url(&parts),
            headers: header_pairs(&parts.headers),
            content_length: body.len(),
            body,
        };

        self.service.capture(&key, record).await?;
        Ok(text_response(StatusCode::OK, "ok\n"))
    }

    fn history(&self, key: &BinKey) -> Result<Response<ResponseBody>> {
        let events: Vec<RequestEvent> = self
            .service
            .history(key)?
            .iter()
            .map(|request| RequestEvent::from_captured(request, self.display_body_chars))
            .collect();

        Ok(json_response(StatusCode::OK, serde_json::to_vec(&events)?))
    }

    fn events(&self, key: &BinKey) -> Result<Response<ResponseBody>> {
        let session = self.service.subscribe(key)?;
        let body = event_stream(
            session,
            self.display_body_chars,
            self.keepalive,
            self.shutdown.child_token(),
        );

        let mut response = Response::new(body);
        let headers = response.headers_mut();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
        Ok(response)
    }
}

/// Map an error to its HTTP response
#[must_use]
pub fn error_response(error: &ReqbinError) -> Response<ResponseBody> {
    let (status, message) = match error {
        ReqbinError::BinNotFound(_) => (StatusCode::NOT_FOUND, "no bin found".to_string()),
        ReqbinError::PayloadTooLarge { .. } => (StatusCode::PAYLOAD_TOO_LARGE, error.to_string()),
        ReqbinError::Backpressure { .. } => (StatusCode::SERVICE_UNAVAILABLE, error.to_string()),
        ReqbinError::Http(_) => (StatusCode::BAD_REQUEST, "failed to load body".to_string()),
        ReqbinError::KeyGeneration(_) => {
            warn!("Bin creation failed: {}", error);
            (StatusCode::INTERNAL_SERVER_ERROR, error.to_string())
        }
        _ => (StatusCode::INTERNAL_SERVER_ERROR, error.to_string()),
    };

    let mut response = text_response(status, &format!("{message}\n"));
    if status == StatusCode::SERVICE_UNAVAILABLE {
        response
            .headers_mut()
            .insert(header::RETRY_AFTER, HeaderValue::from_static("1"));
    }
    response
}

fn text_response(status: StatusCode, text: &str) -> Response<ResponseBody> {
    let mut response = Response::new(full(Bytes::from(text.to_string())));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

fn json_response(status: StatusCode, body: Vec<u8>) -> Response<ResponseBody> {
    let mut response = Response::new(full(Bytes::from(body)));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

fn full(bytes: Bytes) -> ResponseBody {
    Full::new(bytes).boxed_unsync()
}

/// Reject early when the declared length is over the cap
fn check_content_length(headers: &HeaderMap, limit: usize) -> Result<()> {
    let declared = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());

    match declared {
        Some(size) if size > limit => Err(ReqbinError::PayloadTooLarge { size, limit }),
        _ => Ok(()),
    }
}

/// Read a body, giving up as soon as it passes `limit` bytes
async fn read_body<B>(body: B, limit: usize) -> Result<Bytes>
where
    B: Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    match Limited::new(body, limit).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
            Err(ReqbinError::PayloadTooLarge {
                size: limit + 1,
                limit,
            })
        }
        Err(e) => Err(ReqbinError::Http(format!("Failed to read body: {e}"))),
    }
}

/// `http://<host><path-and-query>` for origin-form targets
fn absolute_url(parts: &Parts) -> String {
    if parts.uri.scheme().is_some() {
        return parts.uri.to_string();
    }

    let host = parts
        .headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost");
    let path = parts
        .uri
        .path_and_query()
        .map_or("/", |pq| pq.as_str());

    format!("http://{host}{path}")
}

fn header_pairs(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use http_body_util::Empty;

    fn router() -> Router {
        let (service, _handle) = BinService::spawn(&Config::default(), CancellationToken::new());
        Router::new(service, 1000, Duration::from_secs(60), CancellationToken::new())
    }

    async fn body_text(response: Response<ResponseBody>) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8_lossy(&bytes).into_owned()
    }

    async fn new_bin(router: &Router) -> String {
        let request = Request::post("/g/-/new").body(Empty::<Bytes>::new()).unwrap();
        let response = router.handle(request).await;
        assert_eq!(response.status(), StatusCode::CREATED);

        let value: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        value["key"].as_str().unwrap().to_string()
    }

    #[test]
    fn test_route_parse() {
        assert_eq!(Route::parse("/"), Route::Index);
        assert_eq!(Route::parse("/g/-/new"), Route::NewBin);
        assert_eq!(Route::parse("/g/abc"), Route::Capture("abc"));
        assert_eq!(Route::parse("/g/abc/"), Route::Capture("abc"));
        assert_eq!(Route::parse("/g/abc/history"), Route::History("abc"));
        assert_eq!(Route::parse("/g/abc/reqevents"), Route::Events("abc"));
        assert_eq!(Route::parse("/g/abc/inspect"), Route::NotFound);
        assert_eq!(Route::parse("/other"), Route::NotFound);
    }

    #[test]
    fn test_check_content_length() {
        let mut headers = HeaderMap::new();
        assert!(check_content_length(&headers, 10).is_ok());

        headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("11"));
        assert!(matches!(
            check_content_length(&headers, 10),
            Err(ReqbinError::PayloadTooLarge { size: 11, limit: 10 })
        ));
    }

    #[tokio::test]
    async fn test_read_body_limit() {
        let ok = read_body(Full::new(Bytes::from("12345")), 5).await.unwrap();
        assert_eq!(&ok[..], b"12345");

        let too_big = read_body(Full::new(Bytes::from("123456")), 5).await;
        assert!(matches!(too_big, Err(ReqbinError::PayloadTooLarge { .. })));
    }

    #[test]
    fn test_absolute_url() {
        let (parts, ()) = Request::get("/g/abc?x=1")
            .header(header::HOST, "example.test:8000")
            .body(())
            .unwrap()
            .into_parts();
        assert_eq!(absolute_url(&parts), "http://example.test:8000/g/abc?x=1");
    }

    #[test]
    fn test_error_response_status() {
        let cases = [
            (ReqbinError::BinNotFound(BinKey::new("x")), StatusCode::NOT_FOUND),
            (
                ReqbinError::PayloadTooLarge { size: 2, limit: 1 },
                StatusCode::PAYLOAD_TOO_LARGE,
            ),
            (
                ReqbinError::Backpressure { capacity: 1 },
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                ReqbinError::KeyGeneration("x".to_string()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (error, status) in cases {
            assert_eq!(error_response(&error).status(), status);
        }
    }

    #[tokio::test]
    async fn test_index() {
        let response = router()
            .handle(Request::get("/").body(Empty::<Bytes>::new()).unwrap())
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_text(response).await.contains("/g/-/new"));
    }

    #[tokio::test]
    async fn test_new_bin_sets_location() {
        let router = router();
        let request = Request::post("/g/-/new").body(Empty::<Bytes>::new()).unwrap();
        let response = router.handle(request).await;

        let location = response.headers()[header::LOCATION].to_str().unwrap().to_string();
        assert!(location.starts_with("/g/"));
        assert_eq!(location.len(), "/g/".len() + 10);
    }

    #[tokio::test]
    async fn test_capture_then_history() {
        let router = router();
        let key = new_bin(&router).await;

        let request = Request::post(format!("/g/{key}?q=1"))
            .header(header::HOST, "bins.test")
            .header("x-trace", "b")
            .header("x-trace", "a")
            .body(Full::new(Bytes::from("payload")))
            .unwrap();
        let response = router.handle(request).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "ok\n");

        let request = Request::get(format!("/g/{key}/history"))
            .body(Empty::<Bytes>::new())
            .unwrap();
        let response = router.handle(request).await;
        let value: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();

        let event = &value[0];
        assert_eq!(event["method"], "POST");
        assert_eq!(event["url"], format!("http://bins.test/g/{key}?q=1"));
        assert_eq!(event["body"], "payload");
        assert_eq!(event["contentLength"], "7");

        let traces: Vec<&str> = event["headers"]
            .as_array()
            .unwrap()
            .iter()
            .filter(|h| h["key"] == "x-trace")
            .map(|h| h["value"].as_str().unwrap())
            .collect();
        assert_eq!(traces, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_capture_unknown_bin() {
        let request = Request::post("/g/missing").body(Full::new(Bytes::from("x"))).unwrap();
        let response = router().handle(request).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_capture_wrong_method() {
        let request = Request::delete("/g/abc").body(Empty::<Bytes>::new()).unwrap();
        let response = router().handle(request).await;
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(response.headers()[header::ALLOW], "GET, POST");
    }

    #[tokio::test]
    async fn test_events_headers() {
        let router = router();
        let key = new_bin(&router).await;

        let request = Request::get(format!("/g/{key}/reqevents"))
            .body(Empty::<Bytes>::new())
            .unwrap();
        let response = router.handle(request).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/event-stream");
        assert_eq!(response.headers()[header::CACHE_CONTROL], "no-cache");
    }

    #[tokio::test]
    async fn test_events_unknown_bin() {
        let request = Request::get("/g/missing/reqevents")
            .body(Empty::<Bytes>::new())
            .unwrap();
        let response = router().handle(request).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
