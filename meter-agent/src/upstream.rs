use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use meter_auth::{CIPHERED_HEADER, HASH_HEADER, REAL_IP_HEADER};
use meter_common::{is_connection_refused, try_run};
use reqwest::header::{CONTENT_ENCODING, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use tokio::net::UdpSocket;
use url::{Host, Url};

use crate::payload::Upload;

/// An error sending a request to the collector.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    /// The collector address is not a valid base URL.
    #[error("invalid collector address `{0}`")]
    InvalidAddress(String),
    /// The request could not be sent or the response not received.
    #[error("could not send request")]
    Reqwest(#[from] reqwest::Error),
    /// The collector rejected the request.
    #[error("collector responded with status {0}")]
    Status(StatusCode),
}

/// HTTP client for the collector.
///
/// Every request is retried on refused connections with the shared backoff schedule.
#[derive(Clone, Debug)]
pub struct UpstreamClient {
    client: Client,
    base_url: Url,
    real_ip: Option<IpAddr>,
}

impl UpstreamClient {
    /// Creates a client for the collector at `address`.
    ///
    /// `address` is either `host:port` or a full URL, optionally with a path prefix. The local
    /// address used to reach the collector is resolved once and sent with every request.
    pub async fn new(address: &str, timeout: Duration) -> Result<Self, UpstreamError> {
        let invalid = || UpstreamError::InvalidAddress(address.to_owned());

        let base_url = if address.contains("://") {
            Url::parse(address)
        } else {
            Url::parse(&format!("http://{address}"))
        }
        .map_err(|_| invalid())?;

        if base_url.cannot_be_a_base() || base_url.host().is_none() {
            return Err(invalid());
        }

        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            real_ip: local_ip(&base_url).await,
            base_url,
        })
    }

    /// Returns the base URL of the collector.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Appends path segments to the base URL, percent-encoding each of them.
    ///
    /// An empty last segment produces a trailing slash.
    pub fn url<I>(&self, segments: I) -> Url
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let mut url = self.base_url.clone();
        // Base URLs are checked in `new`, so the path is always mutable.
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    /// Returns the address sent in the `X-Real-IP` header.
    pub fn real_ip(&self) -> Option<IpAddr> {
        self.real_ip
    }

    /// Returns `true` if the collector's health endpoint answers with `200 OK`.
    pub async fn ping(&self) -> bool {
        let url = self.url(["ping"]);
        let result = try_run(
            || self.client.get(url.clone()).send(),
            |error| is_connection_refused(error),
        )
        .await;

        match result {
            Ok(response) => response.status() == StatusCode::OK,
            Err(error) => {
                meter_log::warn!(
                    error = &error as &dyn std::error::Error,
                    "collector health check failed"
                );
                false
            }
        }
    }

    /// Posts an upload to the collector.
    pub async fn send(&self, upload: &Upload) -> Result<(), UpstreamError> {
        let response = try_run(
            || self.request(upload).send(),
            |error| is_connection_refused(error),
        )
        .await?;

        let status = response.status();
        // Drain the body so the connection can be reused.
        response.bytes().await?;

        if !status.is_success() {
            return Err(UpstreamError::Status(status));
        }

        Ok(())
    }

    fn request(&self, upload: &Upload) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .post(self.url(&upload.segments))
            .header(CONTENT_TYPE, upload.content_type)
            .body(upload.body.clone());

        if upload.compressed {
            builder = builder.header(CONTENT_ENCODING, "gzip");
        }
        if upload.ciphered {
            builder = builder.header(CIPHERED_HEADER, "true");
        }
        if let Some(ref signature) = upload.signature {
            builder = builder.header(HASH_HEADER, signature);
        }
        if let Some(ip) = self.real_ip {
            builder = builder.header(REAL_IP_HEADER, ip.to_string());
        }

        builder
    }
}

/// Returns the local address the system routes traffic to the collector from.
///
/// Connecting a UDP socket sends no packets.
async fn local_ip(url: &Url) -> Option<IpAddr> {
    let host = match url.host()? {
        Host::Domain(domain) => domain.to_owned(),
        Host::Ipv4(ip) => ip.to_string(),
        Host::Ipv6(ip) => ip.to_string(),
    };
    let port = url.port_or_known_default()?;

    let result = async {
        let target = tokio::net::lookup_host((host.as_str(), port))
            .await?
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "host has no address"))?;

        let unspecified: IpAddr = match target {
            SocketAddr::V4(_) => Ipv4Addr::UNSPECIFIED.into(),
            SocketAddr::V6(_) => Ipv6Addr::UNSPECIFIED.into(),
        };

        let socket = UdpSocket::bind((unspecified, 0)).await?;
        socket.connect(target).await?;
        socket.local_addr()
    }
    .await;

    match result {
        Ok(addr) => Some(addr.ip()),
        Err(error) => {
            meter_log::warn!(
                error = &error as &dyn std::error::Error,
                "could not determine local address for {host}"
            );
            None
        }
    }
}
