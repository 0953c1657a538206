use anyhow::Result;
use reflectrpc_base::error::ReflectRpcError;
use reflectrpc_base::DIAL_TIMEOUT;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tonic::transport::{Channel, Endpoint};

/// Plaintext channel to one target server.
///
/// One connection is dialed per tool operation and released when the value is
/// dropped, on every exit path.
#[derive(Debug)]
pub struct GrpcConnection {
    uri: String,
    channel: Channel,
}

impl GrpcConnection {
    /// Dial `address` (`host:port` or `http://host:port`) within `DIAL_TIMEOUT`.
    pub async fn dial(address: &str) -> Result<Self> {
        Self::dial_within(address, DIAL_TIMEOUT).await
    }

    pub async fn dial_within(address: &str, bound: Duration) -> Result<Self> {
        let uri = normalize_address(address)?;
        let endpoint = Endpoint::from_shared(uri.clone())
            .map_err(|e| {
                ReflectRpcError::ConnectionError(format!("invalid address {}: {}", address, e))
            })?
            .connect_timeout(bound);

        let channel = bounded_connect(address, bound, endpoint.connect()).await?;
        tracing::debug!("connected to {}", uri);
        Ok(Self { uri, channel })
    }

    /// `dial` raced against `ct`.
    pub async fn dial_with_cancel(address: &str, ct: &CancellationToken) -> Result<Self> {
        tokio::select! {
            biased;
            _ = ct.cancelled() => Err(ReflectRpcError::Cancelled(format!(
                "dialing {} was cancelled",
                address
            ))
            .into()),
            res = Self::dial(address) => res,
        }
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    // Channel is a cheap handle onto the same underlying connection
    pub fn channel(&self) -> Channel {
        self.channel.clone()
    }
}

impl Drop for GrpcConnection {
    fn drop(&mut self) {
        tracing::debug!("release connection to {}", self.uri);
    }
}

async fn bounded_connect<T, E>(
    address: &str,
    bound: Duration,
    connect: impl Future<Output = Result<T, E>>,
) -> Result<T>
where
    E: std::fmt::Display + std::fmt::Debug,
{
    match tokio::time::timeout(bound, connect).await {
        Ok(Ok(connected)) => Ok(connected),
        Ok(Err(e)) => {
            tracing::warn!("failed to connect to {}: {:?}", address, e);
            Err(ReflectRpcError::ConnectionError(format!(
                "failed to connect to {}: {}",
                address, e
            ))
            .into())
        }
        Err(_) => {
            tracing::warn!("connect to {} timed out", address);
            Err(ReflectRpcError::ConnectionError(format!(
                "timed out after {:?} connecting to {}",
                bound, address
            ))
            .into())
        }
    }
}

fn normalize_address(address: &str) -> Result<String> {
    let address = address.trim();
    if address.is_empty() {
        return Err(ReflectRpcError::InvalidParameter("server address is empty".to_string()).into());
    }
    if address.starts_with("https://") {
        return Err(ReflectRpcError::ConnectionError(format!(
            "TLS is not supported, use a plaintext address: {}",
            address
        ))
        .into());
    }
    if address.contains("://") {
        Ok(address.to_string())
    } else {
        Ok(format!("http://{}", address))
    }
}
