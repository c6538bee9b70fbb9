/// Transport trait: the request/response exchange with the block service.
///
/// The driver never touches a socket. It hands a fully encoded request to a
/// `Transport` and gets the response bytes back. The in-memory service and
/// the worker-thread adapter both implement this trait.
use core::time::Duration;

use crate::error::TransportError;

mod sim;
mod threaded;

pub use sim::{SimService, SimStats};
pub use threaded::ThreadedTransport;

/// Synchronous point-to-point packet exchange.
pub trait Transport {
    /// Send `request` and write the response into `response`.
    ///
    /// `response` is at least `DATA_PACKET_SIZE` bytes. Returns the response
    /// length. `timeout` of `None` waits indefinitely.
    fn post(
        &mut self,
        request: &[u8],
        response: &mut [u8],
        timeout: Option<Duration>,
    ) -> Result<usize, TransportError>;
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn post(
        &mut self,
        request: &[u8],
        response: &mut [u8],
        timeout: Option<Duration>,
    ) -> Result<usize, TransportError> {
        (**self).post(request, response, timeout)
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn post(
        &mut self,
        request: &[u8],
        response: &mut [u8],
        timeout: Option<Duration>,
    ) -> Result<usize, TransportError> {
        (**self).post(request, response, timeout)
    }
}
