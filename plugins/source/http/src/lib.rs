use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use tokio_util::io::StreamReader;

use framing_lines::{FramedLineReader, LinesFraming};
use logpipe_api::{LineSource, LineSupplier, PluginError};

type BodyStream = Pin<Box<dyn Stream<Item = Result<Bytes, std::io::Error>> + Send>>;

/// Streaming HTTP(S) GET line source.
///
/// The response body is framed into lines as it arrives, nothing is
/// buffered beyond the current chunk. A non-2xx status is reported by
/// `open`; a broken body mid-stream surfaces as an `Io` error from
/// `next_line`.
pub struct HttpSource {
    url: String,
    client: reqwest::Client,
    framing: LinesFraming,
}

impl HttpSource {
    pub fn new(url: impl Into<String>, connect_timeout: Duration, max_line_length: usize) -> Result<Self, PluginError> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .user_agent(concat!("logpipe/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| PluginError::config(format!("http client: {e}")))?;
        Ok(Self {
            url: url.into(),
            client,
            framing: LinesFraming::new(max_line_length),
        })
    }
}

impl LineSource for HttpSource {
    fn describe(&self) -> String {
        self.url.clone()
    }

    fn open(&self) -> Pin<Box<dyn Future<Output = Result<Box<dyn LineSupplier>, PluginError>> + Send + '_>> {
        Box::pin(async move {
            let response = self
                .client
                .get(&self.url)
                .send()
                .await
                .map_err(|e| PluginError::io(format!("GET {}: {e}", self.url)))?;

            let status = response.status();
            if !status.is_success() {
                return Err(PluginError::io(format!("GET {}: status {status}", self.url)));
            }
            tracing::info!(url = %self.url, %status, "http source opened");

            let body: BodyStream = Box::pin(
                response
                    .bytes_stream()
                    .map(|chunk| chunk.map_err(std::io::Error::other)),
            );
            let reader = StreamReader::new(body);
            Ok(Box::new(FramedLineReader::new(self.url.clone(), reader, self.framing)) as Box<dyn LineSupplier>)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use logpipe_api::{ErrorKind, RawLine};

    #[tokio::test]
    async fn streams_body_lines() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/nginx_json_logs")
            .with_status(200)
            .with_body("{\"status\":\"200\"}\r\nnot-json\n{\"status\":\"404\"}\n")
            .create_async()
            .await;

        let source = HttpSource::new(format!("{}/nginx_json_logs", server.url()), Duration::from_secs(5), 0).unwrap();
        let mut supplier = source.open().await.unwrap();

        let mut lines = Vec::new();
        while let Some(line) = supplier.next_line().await.unwrap() {
            lines.push(line);
        }
        mock.assert_async().await;
        assert_eq!(
            lines,
            vec![
                RawLine::new(1, "{\"status\":\"200\"}"),
                RawLine::new(2, "not-json"),
                RawLine::new(3, "{\"status\":\"404\"}"),
            ]
        );
    }

    #[tokio::test]
    async fn error_status_is_unavailable() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server.mock("GET", "/gone").with_status(404).create_async().await;

        let source = HttpSource::new(format!("{}/gone", server.url()), Duration::from_secs(5), 0).unwrap();
        let err = source.open().await.err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Io);
        assert!(err.message().contains("404"));
    }
}
