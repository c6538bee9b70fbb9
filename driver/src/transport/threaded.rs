/// Worker-thread transport adapter that enforces the post timeout.
///
/// The wrapped transport runs on its own thread. Each post ships the request
/// over a channel and waits for the reply with `recv_timeout`. A post that
/// times out leaves the worker busy; its late reply is discarded by matching
/// request ids.
use core::time::Duration;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use log::{debug, warn};

use super::Transport;
use crate::error::TransportError;
use crate::proto::DATA_PACKET_SIZE;

struct Request {
    id: u64,
    bytes: Vec<u8>,
    timeout: Option<Duration>,
}

struct Reply {
    id: u64,
    result: Result<Vec<u8>, TransportError>,
}

pub struct ThreadedTransport {
    requests: Option<Sender<Request>>,
    replies: Receiver<Reply>,
    worker: Option<JoinHandle<()>>,
    next_id: u64,
}

impl ThreadedTransport {
    /// Move `inner` onto a worker thread.
    pub fn spawn<T>(mut inner: T) -> Self
    where
        T: Transport + Send + 'static,
    {
        let (req_tx, req_rx) = mpsc::channel::<Request>();
        let (reply_tx, reply_rx) = mpsc::channel::<Reply>();

        let worker = thread::spawn(move || {
            let mut buf = vec![0u8; DATA_PACKET_SIZE];
            for req in req_rx {
                let result = inner
                    .post(&req.bytes, &mut buf, req.timeout)
                    .map(|len| buf[..len].to_vec());
                if reply_tx.send(Reply { id: req.id, result }).is_err() {
                    break;
                }
            }
            debug!("transport worker exiting");
        });

        Self {
            requests: Some(req_tx),
            replies: reply_rx,
            worker: Some(worker),
            next_id: 0,
        }
    }

    /// Wait for the reply to request `id`. The timeout bounds the whole
    /// wait, stale replies included.
    fn wait(&self, id: u64, timeout: Option<Duration>) -> Result<Reply, TransportError> {
        let deadline = timeout.map(|t| (t, Instant::now() + t));
        loop {
            let reply = match deadline {
                Some((t, at)) => {
                    let left = at.saturating_duration_since(Instant::now());
                    if left.is_zero() {
                        return Err(TransportError::Timeout(t));
                    }
                    self.replies.recv_timeout(left).map_err(|e| match e {
                        RecvTimeoutError::Timeout => TransportError::Timeout(t),
                        RecvTimeoutError::Disconnected => TransportError::Disconnected,
                    })?
                }
                None => self.replies.recv().map_err(|_| TransportError::Disconnected)?,
            };
            if reply.id == id {
                return Ok(reply);
            }
            debug!("discarding stale reply {}", reply.id);
        }
    }
}

impl Transport for ThreadedTransport {
    fn post(
        &mut self,
        request: &[u8],
        response: &mut [u8],
        timeout: Option<Duration>,
    ) -> Result<usize, TransportError> {
        let id = self.next_id;
        self.next_id += 1;

        let sender = self.requests.as_ref().ok_or(TransportError::Disconnected)?;
        sender
            .send(Request {
                id,
                bytes: request.to_vec(),
                timeout,
            })
            .map_err(|_| TransportError::Disconnected)?;

        let reply = self.wait(id, timeout).inspect_err(|e| {
            warn!("post {} failed: {}", id, e);
        })?;
        let bytes = reply.result?;
        if bytes.len() > response.len() {
            return Err(TransportError::Rejected(format!(
                "response of {} bytes exceeds buffer of {}",
                bytes.len(),
                response.len()
            )));
        }
        response[..bytes.len()].copy_from_slice(&bytes);
        Ok(bytes.len())
    }
}

impl Drop for ThreadedTransport {
    fn drop(&mut self) {
        // Closing the request channel ends the worker loop.
        self.requests.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}
