use std::future::Future;
use std::io;
use std::time::Duration;

use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt, future};
use tokio_util::codec::{FramedRead, LinesCodec};
use tokio_util::io::StreamReader;
use tracing::debug;

use crate::error::{ClientError, Result};
use crate::frame::{MAX_FRAME_LEN, frame_payload};
use logtail_types::StreamRequest;

/// Stream of raw JSON payloads, one per pushed event
pub type EventStream = BoxStream<'static, Result<String>>;

/// Opens push-stream connections
///
/// A transport is asked for one connection at a time; the returned stream
/// ends (or yields an error) when the connection is lost.
pub trait LogTransport: Send + Sync + 'static {
    fn open(&self, request: &StreamRequest) -> impl Future<Output = Result<EventStream>> + Send;
}

/// Connect timeout for the stream request (the body itself never times out)
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// HTTP implementation of [`LogTransport`]
#[derive(Clone, Debug)]
pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
}

impl HttpTransport {
    /// Create a transport for the given stream endpoint
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;
        Ok(Self::with_client(url, client))
    }

    /// Create a transport using a preconfigured client
    pub fn with_client(url: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Build the HTTP request for a stream connection
    pub fn build_request(&self, request: &StreamRequest) -> Result<reqwest::Request> {
        Ok(self
            .client
            .get(&self.url)
            .query(&request.query_pairs())
            .header(reqwest::header::ACCEPT, "application/x-ndjson, text/event-stream")
            .build()?)
    }
}

impl LogTransport for HttpTransport {
    async fn open(&self, request: &StreamRequest) -> Result<EventStream> {
        let http_request = self.build_request(request)?;
        debug!(
            url = %self.url,
            tail = request.tail,
            authenticated = request.token.is_some(),
            "opening log stream"
        );

        let response = self.client.execute(http_request).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::Status(status.as_u16()));
        }

        let body = response.bytes_stream().map_err(io::Error::other);
        let lines = FramedRead::new(
            StreamReader::new(body),
            LinesCodec::new_with_max_length(MAX_FRAME_LEN),
        );

        let payloads = lines.filter_map(|line| {
            future::ready(match line {
                Ok(line) => frame_payload(&line).map(|payload| Ok(payload.to_string())),
                Err(e) => Some(Err(ClientError::from(e))),
            })
        });

        Ok(payloads.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use logtail_types::{LogLevel, StreamFilters};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn transport(url: String) -> HttpTransport {
        let client = reqwest::Client::builder().no_proxy().build().unwrap();
        HttpTransport::with_client(url, client)
    }

    /// Serve a single canned HTTP response and report the request head
    async fn serve_once(response: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/api/logs/stream", listener.local_addr().unwrap());
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut head = Vec::new();
            let mut buf = [0u8; 1024];
            while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                head.extend_from_slice(&buf[..n]);
            }
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
            String::from_utf8_lossy(&head).into_owned()
        });
        (url, handle)
    }

    #[test]
    fn test_build_request_query() {
        let transport = transport("http://localhost:8000/api/logs/stream".to_string());
        let request = StreamRequest {
            token: Some("secret".into()),
            filters: StreamFilters {
                sources: vec!["api.log".into()],
                levels: vec![LogLevel::Error, LogLevel::Critical],
                keyword: Some("timeout".into()),
            },
            tail: 100,
        };
        let built = transport.build_request(&request).unwrap();
        let query = built.url().query().unwrap();
        assert_eq!(
            query,
            "token=secret&sources=api.log&levels=ERROR%2CCRITICAL&keyword=timeout&tail=100"
        );
    }

    #[tokio::test]
    async fn test_open_yields_payload_frames() {
        let (url, server) = serve_once(
            "HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nConnection: close\r\n\r\n\
             data: {\"type\":\"connected\"}\n\n\
             : ping\n\
             {\"type\":\"log\",\"message\":\"boot\"}\n",
        )
        .await;

        let request = StreamRequest {
            token: None,
            tail: 0,
            ..Default::default()
        };
        let stream = transport(url).open(&request).await.unwrap();
        let frames: Vec<String> = stream.try_collect().await.unwrap();
        assert_eq!(
            frames,
            vec![
                r#"{"type":"connected"}"#.to_string(),
                r#"{"type":"log","message":"boot"}"#.to_string(),
            ]
        );

        let head = server.await.unwrap();
        assert!(head.starts_with("GET /api/logs/stream?tail=0 "));
    }

    #[tokio::test]
    async fn test_open_rejects_error_status() {
        let (url, _server) = serve_once(
            "HTTP/1.1 401 Unauthorized\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        )
        .await;

        let result = transport(url).open(&StreamRequest::default()).await;
        assert!(matches!(result, Err(ClientError::Status(401))));
    }
}
