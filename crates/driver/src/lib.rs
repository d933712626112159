//! Client driver for the Unitree Go2 quadruped over WebRTC.
//!
//! The device exposes a single peer connection carrying one bidirectional
//! "data" channel (request/response and pub/sub bus), an inbound video
//! track, and a bidirectional audio track. [`Go2Connection::connect`]
//! negotiates the session over one of three signaling paths (device access
//! point, local network, or the vendor cloud with TURN relay), answers the
//! validation handshake, and hands out the channel handles.
//!
//! ```no_run
//! use go2_driver::{Go2Connection, protocol::ConnectOptions};
//! use go2_driver::channel::RequestOptions;
//! use go2_driver::protocol::topics::{sport, topic};
//!
//! # async fn run() -> go2_driver::Result<()> {
//! let conn = Go2Connection::connect(ConnectOptions::local_ap()).await?;
//! conn.data_channel()
//!     .pub_sub()
//!     .publish_request_new(topic::SPORT_REQUEST, RequestOptions::new(sport::HELLO))
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod audio;
pub mod audiohub;
pub mod channel;
pub mod cloud;
pub mod connection;
pub mod crypto;
pub mod discovery;
pub mod error;
pub mod lidar;
pub mod signaling;
pub mod video;

pub use audio::AudioChannel;
pub use audiohub::AudioHub;
pub use channel::{DataChannel, DeviceError, PubSub, RequestOptions};
pub use connection::Go2Connection;
pub use error::{DriverError, Result};
pub use lidar::{DecoderKind, LidarDecoder};
pub use video::VideoChannel;

pub use go2_protocol as protocol;
