//! SOCKS4 wire codec.
//!
//! Requests and replies are small fixed-layout big-endian messages:
//!
//! ```text
//! Request:  | VN | CD | DSTPORT | DSTIP (4) | USERID ... | NULL |   9..=72 bytes
//! Reply:    | VN | CD | DSTPORT | DSTIP (4) |                       8 bytes
//! ```
//!
//! Both sides read a message with a single `read` call, so framing errors
//! (short or long reads) surface immediately instead of waiting for more
//! bytes that may never arrive.

pub mod consts;
mod reply;
mod request;

pub use reply::{Reply, ReplyCode};
pub use request::{parse_destination, Command, Request};
