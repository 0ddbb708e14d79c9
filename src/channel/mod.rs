//! Named-channel primitives shared by both ends of the bridge.
//!
//! The runner and the host never exchange the channel name out of band:
//! each derives it independently from the channel prefix, its build
//! version, and the host's process id (see [`name`]).  [`codec`] provides
//! the newline-delimited framing both directions use on the wire.

pub mod codec;
pub mod name;

pub use codec::{LineCodec, MAX_LINE_BYTES};
pub use name::{cancel_channel_name, channel_name, normalize_version};
