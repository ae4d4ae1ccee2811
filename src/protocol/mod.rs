//! Wire protocol
//!
//! Every message is a single line of whitespace-separated words terminated by
//! `\n`. The first word is the command (requests) or response code
//! (responses); the rest are its arguments.
//!
//! ```text
//! // Client -> Server
//! read T1 /tracks/42
//! write T2 /control/state Quitting
//! delete T3 /control/state
//! quit
//!
//! // Server -> Client
//! RES T1 /tracks/42 directory 7
//! RES T1 /tracks/42/title entry 'Some Song'
//! ACK OK Success read T1 /tracks/42
//! RES ! /control/state entry Quitting
//! ```

pub mod codec;
pub mod message;

pub use codec::{CodecError, LineCodec, MAX_LINE_LENGTH};
pub use message::{AckStatus, Message, ParseError, ACK, BROADCAST_TAG, DELETE, QUIT, READ, RES, WRITE};
