use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method};
use serde::Serialize;
use serde_json::Value;

use super::GatewayError;

#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Empty,
    Json(Value),
    /// `application/x-www-form-urlencoded` fields.
    Form(Vec<(String, String)>),
}

/// Everything needed to (re)build one outbound call.
///
/// The gateway only ever reads a descriptor; credentials are attached to the
/// `reqwest::Request` built for each attempt.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    method: Method,
    path: String,
    query: Vec<(String, String)>,
    headers: HeaderMap,
    body: RequestBody,
}

impl RequestDescriptor {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            headers: HeaderMap::new(),
            body: RequestBody::Empty,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn json<B: Serialize + ?Sized>(mut self, body: &B) -> Result<Self, GatewayError> {
        let value = serde_json::to_value(body)
            .map_err(|e| GatewayError::InvalidRequest(format!("Failed to encode body: {}", e)))?;
        self.body = RequestBody::Json(value);
        Ok(self)
    }

    pub fn form(mut self, fields: Vec<(String, String)>) -> Self {
        self.body = RequestBody::Form(fields);
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &RequestBody {
        &self.body
    }

    /// Resolve against the base URL. Absolute URLs are used as-is.
    pub fn url(&self, base_url: &str) -> String {
        if self.path.starts_with("http://") || self.path.starts_with("https://") {
            return self.path.clone();
        }
        let base = base_url.trim_end_matches('/');
        if self.path.starts_with('/') {
            format!("{}{}", base, self.path)
        } else {
            format!("{}/{}", base, self.path)
        }
    }

    /// Build a fresh request for one attempt.
    ///
    /// `bearer` replaces any `Authorization` header on the descriptor so the
    /// request carries exactly one.
    pub(crate) fn build(
        &self,
        client: &Client,
        base_url: &str,
        bearer: Option<&str>,
    ) -> Result<reqwest::Request, GatewayError> {
        let mut headers = self.headers.clone();
        if let Some(token) = bearer {
            let value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|_| GatewayError::InvalidRequest("Access token is not a valid header value".to_string()))?;
            headers.insert(header::AUTHORIZATION, value);
        }

        let mut builder = client
            .request(self.method.clone(), self.url(base_url))
            .headers(headers);
        if !self.query.is_empty() {
            builder = builder.query(&self.query);
        }
        builder = match &self.body {
            RequestBody::Empty => builder,
            RequestBody::Json(value) => builder.json(value),
            RequestBody::Form(fields) => builder.form(fields),
        };
        builder.build().map_err(GatewayError::from_transport)
    }
}

/// A request on its way through the gateway.
///
/// `already_retried` is set once, on the copy resubmitted after a refresh; a
/// 401 on that copy is terminal.
#[derive(Debug, Clone)]
pub struct PendingRequest {
    pub descriptor: RequestDescriptor,
    pub already_retried: bool,
}

impl PendingRequest {
    pub fn new(descriptor: RequestDescriptor) -> Self {
        Self {
            descriptor,
            already_retried: false,
        }
    }

    /// The copy to resubmit after a refresh.
    pub fn into_retry(self) -> Self {
        Self {
            descriptor: self.descriptor,
            already_retried: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_url_joining() {
        let base = "http://localhost:8000/api/v1/";
        assert_eq!(
            RequestDescriptor::get("/profile/").url(base),
            "http://localhost:8000/api/v1/profile/"
        );
        assert_eq!(
            RequestDescriptor::get("invitations/").url("http://h/api"),
            "http://h/api/invitations/"
        );
        assert_eq!(
            RequestDescriptor::get("https://other.example.com/x").url(base),
            "https://other.example.com/x"
        );
    }

    #[test]
    fn test_build_attaches_single_bearer_header() {
        let client = Client::new();
        let descriptor = RequestDescriptor::get("/profile/").header(
            header::AUTHORIZATION,
            HeaderValue::from_static("Bearer stale"),
        );

        let request = descriptor.build(&client, "http://h", Some("A")).unwrap();
        let values: Vec<&str> = request
            .headers()
            .get_all(header::AUTHORIZATION)
            .iter()
            .map(|v| v.to_str().unwrap())
            .collect();
        assert_eq!(values, vec!["Bearer A"]);

        // The descriptor itself is untouched
        assert_eq!(
            descriptor.headers()[header::AUTHORIZATION].to_str().unwrap(),
            "Bearer stale"
        );
    }

    #[test]
    fn test_build_without_token_omits_header() {
        let client = Client::new();
        let request = RequestDescriptor::get("/organizations/")
            .query("page", "2")
            .build(&client, "http://h/api", None)
            .unwrap();
        assert!(request.headers().get(header::AUTHORIZATION).is_none());
        assert_eq!(request.url().as_str(), "http://h/api/organizations/?page=2");
    }

    #[test]
    fn test_json_body() {
        let descriptor = RequestDescriptor::post("/token/refresh/")
            .json(&json!({"refresh": "R"}))
            .unwrap();
        assert_eq!(descriptor.body(), &RequestBody::Json(json!({"refresh": "R"})));
        assert_eq!(descriptor.method(), &Method::POST);
    }

    #[test]
    fn test_into_retry_sets_flag_once() {
        let pending = PendingRequest::new(RequestDescriptor::get("/profile/"));
        assert!(!pending.already_retried);
        let retry = pending.into_retry();
        assert!(retry.already_retried);
        assert_eq!(retry.descriptor.path(), "/profile/");
    }
}
