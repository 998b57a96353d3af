//! CONNECT / CONNACK exchange.

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

use crate::connect::ConnectMessage;
use crate::error::{Error, Result};
use crate::stream::FramedStream;
use crate::types::packet_type;

/// Send CONNECT and wait for the CONNACK.
///
/// Returns the session-present flag on acceptance. Refusal codes map to the
/// matching [`Error`] variant; anything that is not a 2-byte CONNACK with a
/// known return code is [`Error::InvalidConnectResponse`]. Transport errors
/// are returned unchanged.
pub async fn handshake<S>(stream: &mut FramedStream<S>, message: &ConnectMessage) -> Result<bool>
where
    S: AsyncRead + AsyncWrite,
{
    let payload = message.encode()?;
    stream.write_frame(packet_type::CONNECT, &payload).await?;
    debug!(
        "Sent CONNECT client_id={} keep_alive={}s",
        message.client_id,
        message.keep_alive.as_secs()
    );

    let mut connack = [0u8; 2];
    let header = match stream.read_frame_into(&mut connack).await {
        Ok(header) => header,
        Err(Error::MessageTooLarge { .. }) => return Err(Error::InvalidConnectResponse),
        Err(e) => return Err(e),
    };

    if header.packet_type() != packet_type::CONNACK || header.remaining_length != 2 {
        debug!(
            "Unexpected CONNECT response type=0x{:02x} len={}",
            header.first_byte, header.remaining_length
        );
        return Err(Error::InvalidConnectResponse);
    }

    match connack[1] {
        0 => {}
        1 => return Err(Error::UnacceptableProtocolVersion),
        2 => return Err(Error::IdentifierRejected),
        3 => return Err(Error::ServerUnavailable),
        4 => return Err(Error::BadUsernameOrPassword),
        5 => return Err(Error::Unauthorized),
        _ => return Err(Error::InvalidConnectResponse),
    }

    let session_present = connack[0] & 0x01 != 0;
    debug!("Handshake accepted, session_present={}", session_present);
    Ok(session_present)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    const CONNECT_ABC: &[u8] = &[
        0x10, 0x0f, 0x00, 0x04, b'M', b'Q', b'T', b'T', 0x04, 0x02, 0x00, 0x00, 0x00, 0x03, b'a', b'b', b'c',
    ];

    async fn run(response: &[u8]) -> Result<bool> {
        let mock = Builder::new().write(CONNECT_ABC).read(response).build();
        let mut stream = FramedStream::new(mock).unwrap();
        handshake(&mut stream, &ConnectMessage::new("abc")).await
    }

    #[tokio::test]
    async fn test_accepted() {
        assert!(!run(&[0x20, 0x02, 0x00, 0x00]).await.unwrap());
    }

    #[tokio::test]
    async fn test_session_present() {
        assert!(run(&[0x20, 0x02, 0x01, 0x00]).await.unwrap());
    }

    #[tokio::test]
    async fn test_refusal_codes() {
        assert!(matches!(
            run(&[0x20, 0x02, 0x00, 0x01]).await,
            Err(Error::UnacceptableProtocolVersion)
        ));
        assert!(matches!(
            run(&[0x20, 0x02, 0x00, 0x02]).await,
            Err(Error::IdentifierRejected)
        ));
        assert!(matches!(
            run(&[0x20, 0x02, 0x00, 0x03]).await,
            Err(Error::ServerUnavailable)
        ));
        assert!(matches!(
            run(&[0x20, 0x02, 0x00, 0x04]).await,
            Err(Error::BadUsernameOrPassword)
        ));
        assert!(matches!(
            run(&[0x20, 0x02, 0x00, 0x05]).await,
            Err(Error::Unauthorized)
        ));
    }

    #[tokio::test]
    async fn test_unknown_return_code() {
        assert!(matches!(
            run(&[0x20, 0x02, 0x00, 0x06]).await,
            Err(Error::InvalidConnectResponse)
        ));
    }

    #[tokio::test]
    async fn test_wrong_packet_type() {
        assert!(matches!(
            run(&[0x30, 0x02, 0x00, 0x00]).await,
            Err(Error::InvalidConnectResponse)
        ));
    }

    #[tokio::test]
    async fn test_short_connack() {
        assert!(matches!(
            run(&[0x20, 0x01, 0x00]).await,
            Err(Error::InvalidConnectResponse)
        ));
    }

    #[tokio::test]
    async fn test_oversized_connack() {
        assert!(matches!(
            run(&[0x20, 0x03]).await,
            Err(Error::InvalidConnectResponse)
        ));
    }

    #[tokio::test]
    async fn test_transport_closed() {
        let mock = Builder::new().write(CONNECT_ABC).build();
        let mut stream = FramedStream::new(mock).unwrap();
        assert!(matches!(
            handshake(&mut stream, &ConnectMessage::new("abc")).await,
            Err(Error::SocketDisconnected)
        ));
    }
}
