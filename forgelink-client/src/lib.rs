//! Transport abstraction for forgelink: the [Client] and [EventLoop]
//! traits, the events they produce, and the topic/payload decoding
//! shared by every transport implementation.

mod traits;
mod types;
mod utils;

pub use traits::*;
pub use types::*;
pub use utils::*;

#[cfg(feature = "channel-client")]
pub mod channel;
