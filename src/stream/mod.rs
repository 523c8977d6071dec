pub mod byte_order;
pub mod net_stream;
pub mod serialize;

pub use net_stream::{NetStream, StreamError, StreamMode, HEADER_SIZE};
pub use serialize::{BitSerialize, NetSerialize};
