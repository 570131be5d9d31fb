//! AWS Signature Version 4 request signing.
//!
//! Every request is authorized with [query string authentication], which
//! works the same way for the S3 REST API and the IAM Query API: the signature
//! and its parameters travel in the URL, and only the `host` header is signed.
//!
//! [query string authentication]: https://docs.aws.amazon.com/AmazonS3/latest/API/sigv4-query-string-auth.html

use std::fmt::{self, Write as FmtWrite};

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use thiserror::Error;
use url::Url;

/// Lifetime of a signed URL. Requests are sent right after signing.
pub const DEFAULT_EXPIRES: u64 = 300;

/// Payload hash used for S3, whose request bodies are never signed here.
const UNSIGNED_PAYLOAD: &str = "UNSIGNED-PAYLOAD";

/// SHA-256 of the empty string; Query API requests carry no body.
const EMPTY_PAYLOAD_SHA256: &str =
    "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

/// Long-term or temporary AWS credentials used to sign requests.
#[derive(Clone)]
pub struct Credentials {
    /// AWS Access Key ID
    pub access_key_id: String,
    /// AWS Secret Access Key
    pub secret_access_key: String,
    /// Session token of temporary credentials
    pub session_token: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Credentials {
    /// Credentials without a session token.
    pub fn new(access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token: None,
        }
    }

    /// Attach the session token of temporary credentials.
    pub fn with_session_token(mut self, token: Option<String>) -> Self {
        self.session_token = token;
        self
    }

    /// Authorize a request with a SigV4 presigned URL.
    pub fn authorize<I: Invocation>(
        &self,
        request: &I,
    ) -> Result<Authorization, AuthorizationError> {
        let timestamp = request.time().format("%Y%m%dT%H%M%SZ").to_string();
        let date = &timestamp[0..8];

        let region = request.region();
        let service = request.service();

        let key = SigningKey::derive(&self.secret_access_key, date, region, service);
        let scope = format!("{date}/{region}/{service}/aws4_request");

        let url = request.url();
        let hostname = url
            .host_str()
            .ok_or_else(|| AuthorizationError::InvalidEndpoint("URL missing host".into()))?;
        let host = match url.port() {
            Some(port) => format!("{hostname}:{port}"),
            None => hostname.to_string(),
        };
        let headers = vec![("host".to_string(), host)];

        let payload_hash = if service == "s3" {
            UNSIGNED_PAYLOAD
        } else {
            EMPTY_PAYLOAD_SHA256
        };

        let mut query: Vec<(String, String)> = url
            .query_pairs()
            .map(|(key, value)| (key.into_owned(), value.into_owned()))
            .collect();
        query.push(("X-Amz-Algorithm".into(), "AWS4-HMAC-SHA256".into()));
        if service == "s3" {
            query.push(("X-Amz-Content-Sha256".into(), payload_hash.into()));
        }
        query.push((
            "X-Amz-Credential".into(),
            format!("{}/{scope}", self.access_key_id),
        ));
        query.push(("X-Amz-Date".into(), timestamp.clone()));
        query.push(("X-Amz-Expires".into(), request.expires().to_string()));
        if let Some(token) = &self.session_token {
            query.push(("X-Amz-Security-Token".into(), token.clone()));
        }
        query.push(("X-Amz-SignedHeaders".into(), "host".into()));

        let canonical_query = encode_query(&query);

        // Paths are built from already-encoded segments, so they are signed
        // exactly as they go on the wire.
        let canonical_request = format!(
            "{}\n{}\n{}\n{}\n\n{}\n{}",
            request.method(),
            url.path(),
            canonical_query,
            headers
                .iter()
                .map(|(name, value)| format!("{name}:{}", value.trim()))
                .collect::<Vec<_>>()
                .join("\n"),
            "host",
            payload_hash,
        );

        let digest = Sha256::digest(canonical_request.as_bytes());
        let payload = format!(
            "AWS4-HMAC-SHA256\n{timestamp}\n{scope}\n{}",
            hex_encode(&digest)
        );
        let signature = key.sign(payload.as_bytes());

        let mut url = url.clone();
        url.set_query(Some(&format!(
            "{canonical_query}&X-Amz-Signature={signature}"
        )));

        Ok(Authorization { url, headers })
    }
}

/// Request metadata required for signing.
pub trait Invocation {
    /// The HTTP method for this request.
    fn method(&self) -> &'static str;

    /// The URL for this request, including its unsigned query parameters.
    fn url(&self) -> &Url;

    /// The region for signing (e.g., "us-east-1").
    fn region(&self) -> &str;

    /// The service name for signing. Defaults to "s3".
    fn service(&self) -> &str {
        "s3"
    }

    /// URL signature expiration in seconds.
    fn expires(&self) -> u64 {
        DEFAULT_EXPIRES
    }

    /// The timestamp for signing. Defaults to current time.
    fn time(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// An authorization of the request
#[derive(Debug)]
pub struct Authorization {
    /// The presigned URL
    pub url: Url,
    /// Headers that must be included in the HTTP request
    pub headers: Vec<(String, String)>,
}

/// Errors that can occur during signing.
#[derive(Error, Debug)]
pub enum AuthorizationError {
    /// The endpoint URL is invalid (e.g., missing host).
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),
}

/// AWS SigV4 signing key derived from credentials.
///
/// `HMAC(HMAC(HMAC(HMAC("AWS4" + secret, date), region), service), "aws4_request")`
struct SigningKey(Vec<u8>);

impl SigningKey {
    fn derive(secret: &str, date: &str, region: &str, service: &str) -> Self {
        let secret = format!("AWS4{secret}");
        let k_date = Self::hmac(secret.as_bytes(), date.as_bytes());
        let k_region = Self::hmac(&k_date, region.as_bytes());
        let k_service = Self::hmac(&k_region, service.as_bytes());
        Self(Self::hmac(&k_service, b"aws4_request"))
    }

    fn hmac(key: &[u8], data: &[u8]) -> Vec<u8> {
        let mut mac =
            Hmac::<Sha256>::new_from_slice(key).expect("HMAC-SHA256 accepts keys of any size");
        mac.update(data);
        mac.finalize().into_bytes().to_vec()
    }

    fn sign(&self, data: &[u8]) -> Signature {
        Signature(Self::hmac(&self.0, data))
    }
}

/// HMAC-SHA256 signature bytes.
struct Signature(Vec<u8>);

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex_encode(&self.0))
    }
}

/// Render query parameters the way SigV4 canonicalizes them: every key and
/// value RFC 3986 encoded, pairs sorted.
pub(crate) fn encode_query(pairs: &[(String, String)]) -> String {
    let mut encoded: Vec<(String, String)> = pairs
        .iter()
        .map(|(key, value)| (percent_encode(key), percent_encode(value)))
        .collect();
    encoded.sort();
    encoded
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join("&")
}

/// Encode bytes as lowercase hexadecimal string.
fn hex_encode(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(s, "{byte:02x}");
    }
    s
}

/// Percent-encode a string according to RFC 3986.
///
/// Unreserved characters (A-Z, a-z, 0-9, `-`, `_`, `.`, `~`) are not encoded.
/// All other bytes are encoded as `%XX` where XX is the uppercase hex value.
pub(crate) fn percent_encode(s: &str) -> String {
    let mut result = String::with_capacity(s.len() * 3);
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                result.push(byte as char);
            }
            _ => {
                let _ = write!(result, "%{byte:02X}");
            }
        }
    }
    result
}

/// Percent-encode an object key for use as a URL path, preserving `/`.
pub(crate) fn percent_encode_path(path: &str) -> String {
    percent_encode(path).replace("%2F", "/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn test_credentials() -> Credentials {
        Credentials::new("my-id", "top secret")
    }

    fn test_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 5, 7, 5, 48, 59).unwrap()
    }

    struct TestRequest {
        method: &'static str,
        url: Url,
        service: &'static str,
    }

    impl Invocation for TestRequest {
        fn method(&self) -> &'static str {
            self.method
        }

        fn url(&self) -> &Url {
            &self.url
        }

        fn region(&self) -> &str {
            "us-east-1"
        }

        fn service(&self) -> &str {
            self.service
        }

        fn time(&self) -> DateTime<Utc> {
            test_time()
        }
    }

    fn signature_of(authorization: &Authorization) -> String {
        authorization
            .url
            .query_pairs()
            .find(|(key, _)| key == "X-Amz-Signature")
            .map(|(_, value)| value.into_owned())
            .unwrap_or_default()
    }

    fn iam_request() -> TestRequest {
        TestRequest {
            method: "GET",
            url: Url::parse(
                "https://iam.amazonaws.com/?Action=ListAccessKeys&UserName=alex&Version=2010-05-08",
            )
            .unwrap(),
            service: "iam",
        }
    }

    fn s3_list_request() -> TestRequest {
        TestRequest {
            method: "GET",
            url: Url::parse(
                "https://shared-bucket.s3.us-east-1.amazonaws.com/?list-type=2&prefix=alex%2F",
            )
            .unwrap(),
            service: "s3",
        }
    }

    #[test]
    fn it_signs_iam_query_requests() {
        let authorization = test_credentials().authorize(&iam_request()).unwrap();

        assert_eq!(
            signature_of(&authorization),
            "64db70a6ce2f2847b9e085908514452e4d9105da35a0ee8a8b39c54d77246cd4"
        );
        let query = authorization.url.query().unwrap();
        assert!(query.contains("X-Amz-Credential=my-id%2F20250507%2Fus-east-1%2Fiam%2Faws4_request"));
        assert!(!query.contains("X-Amz-Content-Sha256"));
    }

    #[test]
    fn it_signs_s3_requests_with_an_unsigned_payload() {
        let authorization = test_credentials().authorize(&s3_list_request()).unwrap();

        assert_eq!(
            signature_of(&authorization),
            "86146e17870e273c40bfd9669a051576306a338424ff3fd4726155d9a34ef792"
        );
        let query = authorization.url.query().unwrap();
        assert!(query.contains("X-Amz-Content-Sha256=UNSIGNED-PAYLOAD"));
        assert!(query.contains("prefix=alex%2F"));
    }

    #[test]
    fn it_signs_the_session_token() {
        let credentials =
            test_credentials().with_session_token(Some("token/with+specials=".into()));
        let authorization = credentials.authorize(&iam_request()).unwrap();

        assert_eq!(
            signature_of(&authorization),
            "9adba8960c126559f304f6b93a0694d05cbad125bdf83c7445c132e8218d0d9d"
        );
        assert!(
            authorization
                .url
                .query()
                .unwrap()
                .contains("X-Amz-Security-Token=token%2Fwith%2Bspecials%3D")
        );
    }

    #[test]
    fn it_signs_only_the_host_header() {
        let authorization = test_credentials().authorize(&iam_request()).unwrap();
        assert_eq!(
            authorization.headers,
            vec![("host".to_string(), "iam.amazonaws.com".to_string())]
        );
    }

    #[test]
    fn it_keeps_the_port_in_the_host_header() {
        let request = TestRequest {
            method: "DELETE",
            url: Url::parse("http://127.0.0.1:9000/shared-bucket/alex/file1.txt").unwrap(),
            service: "s3",
        };
        let authorization = test_credentials().authorize(&request).unwrap();
        assert_eq!(authorization.headers[0].1, "127.0.0.1:9000");
    }

    #[test]
    fn it_redacts_secrets_from_debug_output() {
        let credentials = test_credentials().with_session_token(Some("token".into()));
        let rendered = format!("{credentials:?}");
        assert!(!rendered.contains("top secret"));
        assert!(!rendered.contains("\"token\""));
    }

    #[test]
    fn it_hex_encodes_bytes() {
        assert_eq!(hex_encode(&[0x01, 0x02, 0x03, 0x0A, 0x0F]), "0102030a0f");
    }

    #[test]
    fn it_percent_encodes_strings() {
        assert_eq!(percent_encode("abc123"), "abc123");
        assert_eq!(percent_encode("a b+c"), "a%20b%2Bc");
        assert_eq!(percent_encode("test/path"), "test%2Fpath");
        assert_eq!(percent_encode_path("alex/my file.txt"), "alex/my%20file.txt");
    }

    #[test]
    fn it_sorts_encoded_query_pairs() {
        let pairs = vec![
            ("prefix".to_string(), "alex/".to_string()),
            ("list-type".to_string(), "2".to_string()),
        ];
        assert_eq!(encode_query(&pairs), "list-type=2&prefix=alex%2F");
    }
}
