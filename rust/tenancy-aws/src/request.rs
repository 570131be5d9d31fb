//! Signed request execution shared by the S3 and IAM clients.

use reqwest::Method;
use tenancy_core::BackendError;
use url::Url;

use crate::error::{from_response, transport};
use crate::{Credentials, Invocation};

/// One signed call to an AWS endpoint.
#[derive(Debug, Clone)]
pub(crate) struct Call {
    method: &'static str,
    url: Url,
    region: String,
    service: &'static str,
}

impl Call {
    pub(crate) fn new(method: &'static str, url: Url, region: &str) -> Self {
        Self {
            method,
            url,
            region: region.to_string(),
            service: "s3",
        }
    }

    /// Sign for `service` instead of S3.
    pub(crate) fn for_service(mut self, service: &'static str) -> Self {
        self.service = service;
        self
    }

    /// Sign and send the call, returning the response of a successful status.
    ///
    /// Non-success statuses are turned into a [`BackendError`] using the
    /// service's error body. Responses are never retried here.
    pub(crate) async fn send(
        &self,
        http: &reqwest::Client,
        credentials: &Credentials,
    ) -> Result<reqwest::Response, BackendError> {
        let authorized = credentials.authorize(self)?;

        let method = Method::from_bytes(self.method.as_bytes())
            .map_err(|error| BackendError::InvalidArgument(error.to_string()))?;
        let mut builder = http.request(method, authorized.url);
        for (name, value) in authorized.headers {
            builder = builder.header(name, value);
        }

        let response = builder.send().await.map_err(transport)?;
        let status = response.status();
        tracing::debug!(
            method = self.method,
            service = self.service,
            path = self.url.path(),
            %status,
            "aws response"
        );

        if status.is_success() {
            Ok(response)
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(from_response(status, &body))
        }
    }

    /// [`send`](Self::send) and read the body as text.
    pub(crate) async fn text(
        &self,
        http: &reqwest::Client,
        credentials: &Credentials,
    ) -> Result<String, BackendError> {
        self.send(http, credentials)
            .await?
            .text()
            .await
            .map_err(transport)
    }
}

impl Invocation for Call {
    fn method(&self) -> &'static str {
        self.method
    }

    fn url(&self) -> &Url {
        &self.url
    }

    fn region(&self) -> &str {
        &self.region
    }

    fn service(&self) -> &str {
        self.service
    }
}

/// Parse an XML response body.
pub(crate) fn parse_xml<T>(what: &str, body: &str) -> Result<T, BackendError>
where
    T: serde::de::DeserializeOwned,
{
    quick_xml::de::from_str(body).map_err(|error| BackendError::Rejected {
        code: "MalformedResponse".into(),
        message: format!("Failed to parse {what} response: {error}"),
    })
}
