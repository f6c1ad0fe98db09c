use futures_util::StreamExt;
use url::Url;

use crate::{
    error::TransportError,
    transport::{Transport, TransportSink},
};

/// Streams the body of a `GET` request as it arrives.
///
/// Any non-2xx status is reported as [`TransportError::Status`] before the
/// body is read.
#[derive(Debug, Clone, Default)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses a preconfigured client, e.g. with custom headers or proxies.
    #[must_use]
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Transport for HttpTransport {
    fn open(
        &self,
        url: Url,
        sink: TransportSink,
    ) -> impl Future<Output = ()> + Send + 'static {
        let client = self.client.clone();
        async move {
            let response = match client.get(url).send().await {
                Ok(response) => response,
                Err(err) => {
                    sink.error(TransportError::Http(err.to_string()));
                    return;
                }
            };

            let status = response.status();
            if !status.is_success() {
                sink.error(TransportError::Status(status.as_u16()));
                return;
            }
            if !sink.opened() {
                return;
            }

            let mut body = response.bytes_stream();
            while let Some(chunk) = body.next().await {
                match chunk {
                    Ok(bytes) => {
                        if !sink.data(bytes) {
                            return;
                        }
                    }
                    Err(err) => {
                        sink.error(TransportError::Http(err.to_string()));
                        return;
                    }
                }
            }
            sink.end();
        }
    }
}
