pub mod config;
pub mod error;
pub mod proto;
pub mod store;
pub mod transport;

mod driver;
mod shared;

pub use config::DriverConfig;
pub use driver::span::{BlockSpan, BlockSpans};
pub use driver::Driver;
pub use error::{DriverError, PacketError, Result, TransportError};
pub use shared::SharedDriver;
pub use store::{BlockRef, CacheStats, FileHandle};
pub use transport::{SimService, SimStats, ThreadedTransport, Transport};
