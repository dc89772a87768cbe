//! Handles on the transport-level request and response.
//!
//! The gateway passes them through to the customizer untouched; resolvers find them in the
//! execution [`crate::Context`].

use std::sync::Arc;

use http::HeaderMap;
use http::HeaderValue;
use http::Method;
use http::StatusCode;
use http::Uri;
use http::header::HeaderName;
use parking_lot::Mutex;

/// Read-only view of the HTTP request an operation arrived with.
///
/// For subscriptions this is the WebSocket upgrade request.
#[derive(Clone, Debug)]
pub struct TransportRequest {
    inner: Arc<RequestParts>,
}

#[derive(Debug)]
struct RequestParts {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
}

#[buildstructor::buildstructor]
impl TransportRequest {
    #[builder(visibility = "pub")]
    fn new(method: Option<Method>, uri: Option<Uri>, headers: Option<HeaderMap>) -> Self {
        Self {
            inner: Arc::new(RequestParts {
                method: method.unwrap_or(Method::GET),
                uri: uri.unwrap_or_else(|| Uri::from_static("/")),
                headers: headers.unwrap_or_default(),
            }),
        }
    }

    pub fn method(&self) -> &Method {
        &self.inner.method
    }

    pub fn uri(&self) -> &Uri {
        &self.inner.uri
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.inner.headers
    }

    pub fn header(&self, name: &str) -> Option<&HeaderValue> {
        self.inner.headers.get(name)
    }
}

impl From<&http::request::Parts> for TransportRequest {
    fn from(parts: &http::request::Parts) -> Self {
        Self::builder()
            .method(parts.method.clone())
            .uri(parts.uri.clone())
            .headers(parts.headers.clone())
            .build()
    }
}

/// Mutable status and headers of the HTTP response being prepared for an operation.
///
/// Clones share the same state, so what a resolver writes is what the HTTP layer sends.
#[derive(Clone, Debug, Default)]
pub struct TransportResponse {
    inner: Arc<Mutex<ResponseParts>>,
}

#[derive(Debug, Default)]
struct ResponseParts {
    status: Option<StatusCode>,
    headers: HeaderMap,
}

impl TransportResponse {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn status(&self) -> Option<StatusCode> {
        self.inner.lock().status
    }

    pub fn set_status(&self, status: StatusCode) {
        self.inner.lock().status = Some(status);
    }

    /// Replaces any existing value of the header.
    pub fn insert_header(&self, name: HeaderName, value: HeaderValue) {
        self.inner.lock().headers.insert(name, value);
    }

    /// Adds a value without removing the existing ones (e.g. `set-cookie`).
    pub fn append_header(&self, name: HeaderName, value: HeaderValue) {
        self.inner.lock().headers.append(name, value);
    }

    pub fn headers(&self) -> HeaderMap {
        self.inner.lock().headers.clone()
    }

    /// Copies the status and headers set so far onto `response`.
    pub(crate) fn apply_to<B>(&self, response: &mut http::Response<B>) {
        let parts = self.inner.lock();
        if let Some(status) = parts.status {
            *response.status_mut() = status;
        }
        for (name, value) in parts.headers.iter() {
            response.headers_mut().append(name.clone(), value.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use http::header::CONTENT_TYPE;
    use http::header::SET_COOKIE;

    use super::*;

    #[test]
    fn request_is_built_from_parts() {
        let (parts, ()) = http::Request::builder()
            .method(Method::POST)
            .uri("http://localhost/graphql")
            .header("authorization", "Bearer abc")
            .body(())
            .unwrap()
            .into_parts();

        let request = TransportRequest::from(&parts);
        assert_eq!(request.method(), Method::POST);
        assert_eq!(request.uri().path(), "/graphql");
        assert_eq!(request.header("authorization").unwrap(), "Bearer abc");
    }

    #[test]
    fn response_writes_are_shared_between_clones() {
        let response = TransportResponse::new();
        let seen_by_resolver = response.clone();
        seen_by_resolver.set_status(StatusCode::UNAUTHORIZED);
        seen_by_resolver.append_header(SET_COOKIE, HeaderValue::from_static("a=1"));
        seen_by_resolver.append_header(SET_COOKIE, HeaderValue::from_static("b=2"));

        let mut http_response = http::Response::builder()
            .header(CONTENT_TYPE, "application/json")
            .body(())
            .unwrap();
        response.apply_to(&mut http_response);

        assert_eq!(http_response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(http_response.headers().get_all(SET_COOKIE).iter().count(), 2);
        assert_eq!(
            http_response.headers().get(CONTENT_TYPE).unwrap(),
            "application/json"
        );
    }
}
