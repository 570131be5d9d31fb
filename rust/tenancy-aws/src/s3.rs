//! S3 REST API adapter.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tenancy_core::{BackendError, ObjectStore, Page};
use url::{Host, Url};

use crate::request::{Call, parse_xml};
use crate::signing::{encode_query, percent_encode_path};
use crate::{ClientError, Credentials};

/// Whether to use path-style addressing by default for this endpoint.
///
/// IP addresses and `localhost` cannot carry a bucket subdomain.
pub fn is_path_style_default(endpoint: &Url) -> bool {
    match endpoint.host() {
        Some(Host::Ipv4(_)) | Some(Host::Ipv6(_)) => true,
        Some(Host::Domain(domain)) => domain == "localhost",
        None => false,
    }
}

/// Default S3 endpoint for `region`.
pub fn default_endpoint(region: &str) -> Result<Url, ClientError> {
    Url::parse(&format!("https://s3.{region}.amazonaws.com"))
        .map_err(|error| ClientError::InvalidEndpoint(error.to_string()))
}

/// Response from S3 ListObjectsV2 API.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListBucketResult {
    #[serde(default)]
    is_truncated: bool,
    #[serde(default)]
    contents: Vec<Contents>,
    next_continuation_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Contents {
    key: String,
}

/// [`ObjectStore`] backed by an S3-compatible endpoint.
#[derive(Debug, Clone)]
pub struct S3Client {
    http: reqwest::Client,
    endpoint: Url,
    region: String,
    credentials: Credentials,
    path_style: bool,
}

impl S3Client {
    /// Create a client for `endpoint`. Path-style addressing is chosen from
    /// the endpoint; see [`with_path_style`](Self::with_path_style).
    pub fn new(
        endpoint: Url,
        region: impl Into<String>,
        credentials: Credentials,
        timeout: Duration,
    ) -> Result<Self, ClientError> {
        if endpoint.host_str().is_none() {
            return Err(ClientError::InvalidEndpoint(format!(
                "`{endpoint}` has no host"
            )));
        }
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            path_style: is_path_style_default(&endpoint),
            http,
            endpoint,
            region: region.into(),
            credentials,
        })
    }

    /// Force path-style (`https://endpoint/bucket/key`) or virtual-hosted
    /// (`https://bucket.endpoint/key`) addressing.
    pub fn with_path_style(mut self, path_style: bool) -> Self {
        self.path_style = path_style;
        self
    }

    /// URL of `key` in `bucket`; an empty key addresses the bucket itself.
    fn url(&self, bucket: &str, key: &str, query: &[(String, String)]) -> Result<Url, BackendError> {
        let key = percent_encode_path(key);
        let mut url = self.endpoint.clone();
        if self.path_style {
            url.set_path(&format!("{bucket}/{key}"));
        } else {
            let host = self
                .endpoint
                .host_str()
                .ok_or_else(|| BackendError::InvalidArgument("endpoint has no host".into()))?;
            url.set_host(Some(&format!("{bucket}.{host}")))
                .map_err(|error| {
                    BackendError::InvalidArgument(format!("invalid bucket `{bucket}`: {error}"))
                })?;
            url.set_path(&format!("/{key}"));
        }
        if query.is_empty() {
            url.set_query(None);
        } else {
            url.set_query(Some(&encode_query(query)));
        }
        Ok(url)
    }

    fn call(&self, method: &'static str, url: Url) -> Call {
        Call::new(method, url, &self.region)
    }

    /// Parse the S3 ListObjectsV2 XML response.
    fn parse_list_response(xml: &str) -> Result<Page<String>, BackendError> {
        if !xml.contains("<ListBucketResult") {
            return Err(BackendError::Rejected {
                code: "MalformedResponse".into(),
                message: "Unexpected XML response: missing ListBucketResult element".into(),
            });
        }
        let result: ListBucketResult = parse_xml("ListObjectsV2", xml)?;
        let keys = result.contents.into_iter().map(|c| c.key).collect();
        let next = if result.is_truncated {
            result.next_continuation_token
        } else {
            None
        };
        Ok(Page::new(keys, next))
    }
}

#[async_trait]
impl ObjectStore for S3Client {
    async fn bucket_exists(&self, bucket: &str) -> Result<bool, BackendError> {
        let url = self.url(bucket, "", &[])?;
        match self.call("HEAD", url).send(&self.http, &self.credentials).await {
            Ok(_) => Ok(true),
            Err(error) if error.is_not_found() => Ok(false),
            Err(error) => Err(error),
        }
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        continuation: Option<&str>,
    ) -> Result<Page<String>, BackendError> {
        let mut query = vec![
            ("list-type".to_string(), "2".to_string()),
            ("prefix".to_string(), prefix.to_string()),
        ];
        if let Some(token) = continuation {
            query.push(("continuation-token".to_string(), token.to_string()));
        }
        let url = self.url(bucket, "", &query)?;
        let body = self
            .call("GET", url)
            .text(&self.http, &self.credentials)
            .await?;
        Self::parse_list_response(&body)
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), BackendError> {
        let url = self.url(bucket, key, &[])?;
        self.call("DELETE", url)
            .send(&self.http, &self.credentials)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(endpoint: &str) -> S3Client {
        S3Client::new(
            Url::parse(endpoint).unwrap(),
            "us-east-1",
            Credentials::new("my-id", "top secret"),
            Duration::from_secs(30),
        )
        .unwrap()
    }

    #[test]
    fn it_uses_path_style_for_local_endpoints() {
        assert!(is_path_style_default(&Url::parse("http://localhost:9000").unwrap()));
        assert!(is_path_style_default(&Url::parse("http://127.0.0.1:9000").unwrap()));
        assert!(!is_path_style_default(
            &Url::parse("https://s3.us-east-1.amazonaws.com").unwrap()
        ));
    }

    #[test]
    fn it_builds_virtual_hosted_urls() {
        let client = client("https://s3.us-east-1.amazonaws.com");
        let url = client
            .url("shared-bucket", "alex/my file.txt", &[])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://shared-bucket.s3.us-east-1.amazonaws.com/alex/my%20file.txt"
        );
    }

    #[test]
    fn it_builds_path_style_list_urls() {
        let client = client("http://localhost:9000");
        let query = vec![
            ("list-type".to_string(), "2".to_string()),
            ("prefix".to_string(), "alex/".to_string()),
        ];
        let url = client.url("shared-bucket", "", &query).unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:9000/shared-bucket/?list-type=2&prefix=alex%2F"
        );
    }

    #[test]
    fn it_parses_a_truncated_listing() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<ListBucketResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">
  <Name>shared-bucket</Name>
  <Prefix>alex/</Prefix>
  <KeyCount>2</KeyCount>
  <MaxKeys>2</MaxKeys>
  <IsTruncated>true</IsTruncated>
  <Contents><Key>alex/file1.txt</Key><Size>3</Size></Contents>
  <Contents><Key>alex/file2.txt</Key><Size>3</Size></Contents>
  <NextContinuationToken>1ueGcxLPRx1Tr/XYExHnhbYLgveDs2J/wm36Hy4vbOwM=</NextContinuationToken>
</ListBucketResult>"#;

        let page = S3Client::parse_list_response(xml).unwrap();

        assert_eq!(page.items, vec!["alex/file1.txt", "alex/file2.txt"]);
        assert_eq!(
            page.next.as_deref(),
            Some("1ueGcxLPRx1Tr/XYExHnhbYLgveDs2J/wm36Hy4vbOwM=")
        );
    }

    #[test]
    fn it_parses_an_empty_listing() {
        let xml = r#"<ListBucketResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">
  <Name>shared-bucket</Name>
  <Prefix>nobody/</Prefix>
  <KeyCount>0</KeyCount>
  <IsTruncated>false</IsTruncated>
</ListBucketResult>"#;

        let page = S3Client::parse_list_response(xml).unwrap();

        assert_eq!(page, Page::last(vec![]));
    }

    #[test]
    fn it_rejects_unexpected_documents() {
        assert!(S3Client::parse_list_response("<Other/>").is_err());
    }
}
