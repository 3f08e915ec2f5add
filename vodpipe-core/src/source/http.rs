use std::time::Duration;

use futures::TryStreamExt;
use reqwest::header::LOCATION;
use reqwest::redirect::Policy;
use reqwest::{Client, StatusCode};
use tokio::time::timeout;
use tokio_util::io::StreamReader;
use tracing::{debug, info};
use url::Url;

use super::{OpenOptions, SourceError, SourceHandle, SourceResult};

/// HTTP(S) source. Redirects are followed by hand so the hop budget and the
/// per-attempt timeout stay under our control.
#[derive(Debug, Clone)]
pub struct HttpSource {
    client: Client,
}

impl HttpSource {
    pub fn new(user_agent: &str, read_timeout: Duration) -> SourceResult<Self> {
        let client = Client::builder()
            .user_agent(user_agent)
            .redirect(Policy::none())
            .read_timeout(read_timeout)
            .build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    pub async fn open(&self, url: Url, options: &OpenOptions) -> SourceResult<SourceHandle> {
        let origin = url.to_string();
        let mut current = url;

        for hop in 0..=options.max_redirects {
            let mut request = self.client.get(current.clone());
            for (name, value) in &options.headers {
                request = request.header(name.as_str(), value.as_str());
            }

            let response = match timeout(options.timeout, request.send()).await {
                Err(_) => {
                    return Err(SourceError::RequestTimeout {
                        url: current.to_string(),
                    })
                }
                Ok(Err(err)) if err.is_timeout() => {
                    return Err(SourceError::RequestTimeout {
                        url: current.to_string(),
                    })
                }
                Ok(Err(err)) => return Err(err.into()),
                Ok(Ok(response)) => response,
            };

            let status = response.status();
            if is_followed_redirect(status) {
                let location = response
                    .headers()
                    .get(LOCATION)
                    .and_then(|value| value.to_str().ok())
                    .ok_or_else(|| SourceError::RedirectWithoutLocation {
                        url: current.to_string(),
                        status: status.as_u16(),
                    })?;
                let next = current.join(location).map_err(|err| SourceError::InvalidUrl {
                    url: location.to_string(),
                    reason: err.to_string(),
                })?;
                debug!(hop, from = %current, to = %next, status = status.as_u16(), "following redirect");
                current = next;
                continue;
            }

            if !status.is_success() {
                return Err(SourceError::HttpStatus {
                    url: current.to_string(),
                    status: status.as_u16(),
                });
            }

            let content_length = response.content_length();
            info!(url = %current, content_length = ?content_length, "source stream opened");
            let body = Box::pin(response.bytes_stream().map_err(std::io::Error::other));
            let handle = SourceHandle::new(Box::new(StreamReader::new(body)))
                .with_content_length(content_length);
            return Ok(handle);
        }

        Err(SourceError::TooManyRedirects {
            url: origin,
            max: options.max_redirects,
        })
    }
}

fn is_followed_redirect(status: StatusCode) -> bool {
    matches!(status.as_u16(), 301 | 302 | 303 | 307 | 308)
}
