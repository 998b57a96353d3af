//! MQTT 3.1.1 client framing and connection state machine.
//!
//! Two layers:
//!
//! - **Framed stream**: remaining-length varints, a compacting read buffer
//!   that carries partial frames across reads, and header + payload writes
//!   ([`FramedStream`], [`FrameReader`], [`FrameWriter`]).
//! - **Connection**: a [`Client`] that connects through a [`Connector`],
//!   performs the CONNECT/CONNACK handshake, keeps the connection alive with
//!   PINGREQ and an inactivity timeout, and serializes QoS 0 publishes behind
//!   a single write lock.
//!
//! ## Example
//!
//! ```no_run
//! use giztoy_mqtt311::{Client, ClientConfig, TcpConnector};
//!
//! #[tokio::main]
//! async fn main() -> giztoy_mqtt311::Result<()> {
//!     let client = Client::new(
//!         TcpConnector::new("127.0.0.1:1883"),
//!         ClientConfig::new("client-1").with_keep_alive(30),
//!     )?;
//!     client.set_connection_event_callback(|err, event| {
//!         println!("{:?} {:?}", event, err);
//!     });
//!
//!     let run = client.run();
//!     client.publish("test/topic", b"hello").await?;
//!     client.stop();
//!
//!     println!("connection ended: {}", run.await);
//!     Ok(())
//! }
//! ```

mod buffer;
mod client;
pub mod codec;
mod config;
mod connect;
mod error;
mod handshake;
mod stream;
pub mod transport;
mod types;

pub use buffer::ReadBuffer;
pub use client::{
    Client, ConnectDecorator, ConnectionEventCallback, MessageCallback, PublishCompletion, RunCompletion,
};
pub use config::ClientConfig;
pub use connect::{ConnectMessage, Will};
pub use error::{Error, ProtocolError, Result};
pub use handshake::handshake;
pub use stream::{FrameReader, FrameWriter, FramedStream};
pub use transport::{Connector, TcpConnector};
pub use types::{
    ConnectionEvent, ConnectionState, FixedHeader, MAX_FIXED_HEADER_LEN, MAX_REMAINING_LENGTH, QoS, packet_type,
};
