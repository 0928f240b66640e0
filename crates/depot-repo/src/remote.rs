//! Remote origin access for proxy repositories
//!
//! `RemoteFetcher` is the seam between the proxy cache and the network. The
//! HTTP implementation follows redirects itself so that credentials are only
//! ever sent to the origin they were configured for.

use async_trait::async_trait;
use depot_core::{RemoteRepository, RemoteSettings};
use futures::StreamExt;
use futures::stream::BoxStream;
use reqwest::StatusCode;
use reqwest::header::{ACCEPT_RANGES, CONTENT_LENGTH, LOCATION, RANGE};
use url::Url;

use crate::error::{RepoError, Result};

/// Chunks of a remote body
pub type ByteStream = BoxStream<'static, Result<Vec<u8>>>;

const MAX_REDIRECTS: u32 = 10;

/// Basic credentials for a remote origin
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCredentials {
    pub username: String,
    pub password: Option<String>,
}

impl RemoteCredentials {
    /// Credentials configured on a proxy remote, if any
    pub fn from_remote(remote: &RemoteRepository) -> Option<Self> {
        remote.username.as_ref().map(|username| Self {
            username: username.clone(),
            password: remote.password.clone(),
        })
    }
}

/// One GET against a remote, optionally resuming at `offset`
#[derive(Debug, Clone)]
pub struct RemoteRequest {
    pub url: String,
    pub offset: u64,
    pub credentials: Option<RemoteCredentials>,
}

impl RemoteRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            offset: 0,
            credentials: None,
        }
    }

    pub fn with_credentials(mut self, credentials: Option<RemoteCredentials>) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn at_offset(&self, offset: u64) -> Self {
        Self {
            offset,
            ..self.clone()
        }
    }
}

/// Successful remote response
pub struct RemoteResponse {
    /// Length of this body, if announced
    pub content_length: Option<u64>,
    /// Remote announced `Accept-Ranges: bytes`
    pub accepts_ranges: bool,
    /// `206 Partial Content`
    pub partial: bool,
    pub body: ByteStream,
}

impl std::fmt::Debug for RemoteResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteResponse")
            .field("content_length", &self.content_length)
            .field("accepts_ranges", &self.accepts_ranges)
            .field("partial", &self.partial)
            .finish_non_exhaustive()
    }
}

/// Fetches artifact bytes from a remote origin
#[async_trait]
pub trait RemoteFetcher: Send + Sync {
    /// GET the request URL; `Ok(None)` when the remote answers 404
    async fn fetch(&self, request: &RemoteRequest) -> Result<Option<RemoteResponse>>;
}

/// `RemoteFetcher` over reqwest
pub struct HttpRemoteFetcher {
    client: reqwest::Client,
}

impl HttpRemoteFetcher {
    /// Create a client honouring the configured timeouts
    pub fn new(settings: &RemoteSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            // Redirects are followed manually to keep credentials on their origin
            .redirect(reqwest::redirect::Policy::none())
            // Resume offsets count stored bytes, not decoded ones
            .no_gzip()
            .connect_timeout(settings.connect_timeout)
            .timeout(settings.read_timeout)
            .build()
            .map_err(|e| RepoError::NetworkError {
                message: e.to_string(),
            })?;

        Ok(Self { client })
    }

    fn same_origin(a: &str, b: &str) -> bool {
        match (Url::parse(a), Url::parse(b)) {
            (Ok(a), Ok(b)) => a.origin() == b.origin(),
            _ => false,
        }
    }

    async fn send(&self, request: &RemoteRequest) -> Result<(String, reqwest::Response)> {
        let mut current_url = request.url.clone();
        let mut redirects = 0;

        loop {
            let mut builder = self.client.get(&current_url);
            if request.offset > 0 {
                builder = builder.header(RANGE, format!("bytes={}-", request.offset));
            }

            if let Some(creds) = &request.credentials {
                if Self::same_origin(&request.url, &current_url) {
                    builder = builder.basic_auth(&creds.username, creds.password.as_ref());
                } else {
                    tracing::warn!(
                        "Cross-origin redirect from {} to {} - credentials not forwarded",
                        request.url,
                        current_url
                    );
                }
            }

            let response = builder.send().await?;
            if !response.status().is_redirection() {
                return Ok((current_url, response));
            }

            let invalid = |reason: String| RepoError::InvalidRedirect {
                url: current_url.clone(),
                reason,
            };

            redirects += 1;
            if redirects > MAX_REDIRECTS {
                return Err(invalid(format!("more than {} redirects", MAX_REDIRECTS)));
            }

            let location = response
                .headers()
                .get(LOCATION)
                .and_then(|v| v.to_str().ok())
                .ok_or_else(|| invalid("no Location header".to_string()))?;

            let next = Url::parse(&current_url)
                .and_then(|base| base.join(location))
                .map_err(|e| invalid(format!("bad Location '{}': {}", location, e)))?;
            current_url = next.to_string();
        }
    }
}

#[async_trait]
impl RemoteFetcher for HttpRemoteFetcher {
    async fn fetch(&self, request: &RemoteRequest) -> Result<Option<RemoteResponse>> {
        let (url, response) = self.send(request).await?;
        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(RepoError::HttpError {
                status: status.as_u16(),
                message: format!("Request to {} failed", url),
            });
        }

        let headers = response.headers();
        let partial = status == StatusCode::PARTIAL_CONTENT;
        let accepts_ranges = partial
            || headers
                .get(ACCEPT_RANGES)
                .and_then(|v| v.to_str().ok())
                .is_some_and(|v| v.eq_ignore_ascii_case("bytes"));
        let content_length = headers
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok());

        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()).map_err(RepoError::from))
            .boxed();

        Ok(Some(RemoteResponse {
            content_length,
            accepts_ranges,
            partial,
            body,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn read_all(mut body: ByteStream) -> Vec<u8> {
        let mut out = Vec::new();
        while let Some(chunk) = body.next().await {
            out.extend(chunk.unwrap());
        }
        out
    }

    fn fetcher() -> HttpRemoteFetcher {
        HttpRemoteFetcher::new(&RemoteSettings::default()).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_detects_ranges() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/org/foo/bar/1.0/bar-1.0.jar"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Accept-Ranges", "bytes")
                    .set_body_bytes(b"jar-bytes".to_vec()),
            )
            .mount(&server)
            .await;

        let request = RemoteRequest::new(format!("{}/org/foo/bar/1.0/bar-1.0.jar", server.uri()));
        let response = fetcher().fetch(&request).await.unwrap().unwrap();

        assert!(response.accepts_ranges);
        assert!(!response.partial);
        assert_eq!(response.content_length, Some(9));
        assert_eq!(read_all(response.body).await, b"jar-bytes");
    }

    #[tokio::test]
    async fn test_fetch_resumes_with_range_header() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/a.jar"))
            .and(header("Range", "bytes=4-"))
            .respond_with(ResponseTemplate::new(206).set_body_bytes(b"bytes".to_vec()))
            .mount(&server)
            .await;

        let request = RemoteRequest::new(format!("{}/a.jar", server.uri())).at_offset(4);
        let response = fetcher().fetch(&request).await.unwrap().unwrap();

        assert!(response.partial);
        assert!(response.accepts_ranges);
        assert_eq!(read_all(response.body).await, b"bytes");
    }

    #[tokio::test]
    async fn test_fetch_not_found_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let request = RemoteRequest::new(format!("{}/missing.jar", server.uri()));
        assert!(fetcher().fetch(&request).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_fetch_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let request = RemoteRequest::new(format!("{}/a.jar", server.uri()));
        assert!(matches!(
            fetcher().fetch(&request).await,
            Err(RepoError::HttpError { status: 500, .. })
        ));
    }

    #[tokio::test]
    async fn test_credentials_sent_to_origin() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/private.jar"))
            .and(header_exists("Authorization"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"ok".to_vec()))
            .mount(&server)
            .await;

        let request = RemoteRequest::new(format!("{}/private.jar", server.uri())).with_credentials(
            Some(RemoteCredentials {
                username: "deployer".to_string(),
                password: Some("secret".to_string()),
            }),
        );
        let response = fetcher().fetch(&request).await.unwrap().unwrap();
        assert_eq!(read_all(response.body).await, b"ok");
    }

    #[tokio::test]
    async fn test_follows_redirect() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/old.jar"))
            .respond_with(ResponseTemplate::new(302).insert_header("Location", "/new.jar"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/new.jar"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"moved".to_vec()))
            .mount(&server)
            .await;

        let request = RemoteRequest::new(format!("{}/old.jar", server.uri()));
        let response = fetcher().fetch(&request).await.unwrap().unwrap();
        assert_eq!(read_all(response.body).await, b"moved");
    }

    #[tokio::test]
    async fn test_redirect_without_location() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(302))
            .mount(&server)
            .await;

        let request = RemoteRequest::new(format!("{}/a.jar", server.uri()));
        let err = fetcher().fetch(&request).await.unwrap_err();
        assert!(matches!(err, RepoError::InvalidRedirect { .. }), "{err}");
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_redirect_loop_is_not_retried() {
        let server = MockServer::start().await;
        // One download attempt: the first request plus MAX_REDIRECTS hops
        Mock::given(method("GET"))
            .and(path("/loop.jar"))
            .respond_with(ResponseTemplate::new(302).insert_header("Location", "/loop.jar"))
            .expect(u64::from(MAX_REDIRECTS) + 1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let staging = dir.path().join("loop.jar.tmp");
        let request = RemoteRequest::new(format!("{}/loop.jar", server.uri()));
        let result = crate::fetch::download(&fetcher(), &request, &staging, 3).await;

        assert!(matches!(result, Err(RepoError::InvalidRedirect { .. })));
        assert!(!staging.exists());
        server.verify().await;
    }
}
