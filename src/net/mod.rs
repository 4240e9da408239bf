//! Connection primitives: a peekable stream wrapper and a push-based listener,
//! mirroring what a CONNECT tunnel needs that a plain `TcpListener` doesn't.

mod listener;
mod peekable;

pub use listener::{InjectableListener, InjectableListenerHandle};
pub use peekable::{HttpAddr, PeekableConn, PeerAddr};
