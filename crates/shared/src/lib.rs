//! Wire types and codec shared by the murmur client and server.

pub mod codec;
pub mod envelope;
pub mod error;

pub use codec::{decode, decode_frame, encode, encode_text};
pub use envelope::*;
pub use error::*;
