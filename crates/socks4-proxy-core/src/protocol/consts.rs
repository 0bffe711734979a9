//! Protocol constants.

/// Protocol version carried in every request and reply.
pub const VERSION: u8 = 4;

/// CONNECT command byte.
pub const COMMAND_CONNECT: u8 = 1;
/// BIND command byte.
pub const COMMAND_BIND: u8 = 2;

/// Request granted.
pub const REPLY_SUCCESS: u8 = 90;
/// Request rejected or failed.
pub const REPLY_ERROR: u8 = 91;

/// Fixed part of a request: version, command, port and address.
pub const REQUEST_HEADER_LEN: usize = 8;

/// Smallest request: header, empty user id and the NULL terminator.
pub const MIN_REQUEST_LEN: usize = REQUEST_HEADER_LEN + 1;

/// Longest user id accepted, excluding the NULL terminator.
pub const MAX_USER_ID_LEN: usize = 63;

/// Largest request: header, 63 byte user id and the NULL terminator.
pub const MAX_REQUEST_LEN: usize = MIN_REQUEST_LEN + MAX_USER_ID_LEN;

/// Every reply is exactly this long.
pub const REPLY_LEN: usize = 8;
