//! Line-delimited JSON protocol spoken with the authentication backend.
//!
//! One request frame goes out, one reply frame comes back. Replies are read
//! tolerantly: anything that is not a JSON object is reported as malformed
//! rather than raised as an error.

mod codec;
mod types;

pub use codec::{FRAME_DELIMITER, MalformedReason, Reply, decode_reply, encode_command, to_wire_json};
pub use types::*;
