//! Network frame transports.
//!
//! - TCP: reliable ordered fan-out to many clients, one send thread each
//!   ([`tcp_server`]), and the matching single-sender client ([`tcp_client`]).
//! - UDP: lossy single-destination streaming with rate-paced fragmentation
//!   ([`udp_sender`]) and loss-intolerant reassembly ([`udp_receiver`]).
//!
//! Both transports move the same container bytes; which band codec they
//! carry is negotiated out of band ([`crate::config`]).

pub mod assembler;
pub mod packet;
pub mod tcp_client;
pub mod tcp_server;
pub mod udp_receiver;
pub mod udp_sender;

pub use assembler::FrameAssembler;
pub use packet::{PacketHeader, DEFAULT_APP_ID, PACKET_HEADER_LEN};
pub use tcp_client::{parse_address, FrameReceiver, DEFAULT_TCP_PORT};
pub use tcp_server::FrameServer;
pub use udp_receiver::{Reassembler, UdpFrameReceiver, UdpReceiverConfig};
pub use udp_sender::{PacerConfig, UdpFrameSender, DEFAULT_UDP_PORT};
