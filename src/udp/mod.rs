// WSJT-X / JTDX UDP status feed: socket plumbing and datagram decoding

pub mod listener;
pub mod wsjtx;

pub use listener::{bind_socket, run_listener};
pub use wsjtx::{decode_status, scan_text, StatusFrame, TextEvent};
