//! TCP connection to the peer.

use tokio::net::TcpStream;

use crate::error::Result;

/// Connect to the peer's chaincode listener (e.g. `127.0.0.1:7052`).
pub async fn connect(address: &str) -> Result<TcpStream> {
    tracing::debug!(address, "connecting to peer");
    let stream = TcpStream::connect(address).await?;
    stream.set_nodelay(true)?;
    tracing::info!(address, "connected to peer");
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_connect_to_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();

        let accept = tokio::spawn(async move { listener.accept().await.map(|_| ()) });
        let stream = connect(&address).await.unwrap();

        assert!(stream.nodelay().unwrap());
        accept.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_connect_refused_is_io_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);

        let result = connect(&address).await;
        assert!(matches!(result, Err(crate::ShimError::Io(_))));
    }
}
