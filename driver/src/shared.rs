/// Driver shared between threads.
///
/// One lock around the whole driver: operations from different threads are
/// serialized, exactly as if a single caller had issued them in lock order.
use std::sync::Arc;

use spin::Mutex;

use crate::driver::Driver;
use crate::error::Result;
use crate::store::FileHandle;
use crate::transport::Transport;

pub struct SharedDriver<T: Transport> {
    inner: Arc<Mutex<Driver<T>>>,
}

impl<T: Transport> Clone for SharedDriver<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Transport> SharedDriver<T> {
    pub fn new(driver: Driver<T>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(driver)),
        }
    }

    pub fn open(&self, path: &str) -> Result<FileHandle> {
        self.inner.lock().open(path)
    }

    pub fn close(&self, fh: FileHandle) -> Result<()> {
        self.inner.lock().close(fh)
    }

    pub fn seek(&self, fh: FileHandle, offset: u64) -> Result<u64> {
        self.inner.lock().seek(fh, offset)
    }

    pub fn read(&self, fh: FileHandle, buf: &mut [u8]) -> Result<usize> {
        self.inner.lock().read(fh, buf)
    }

    pub fn write(&self, fh: FileHandle, buf: &[u8]) -> Result<usize> {
        self.inner.lock().write(fh, buf)
    }

    /// Run `f` with the lock held, for sequences that must not interleave
    /// (seek followed by read, for instance).
    pub fn with<R>(&self, f: impl FnOnce(&mut Driver<T>) -> R) -> R {
        f(&mut self.inner.lock())
    }

    /// The driver back, if this is the last handle. Needed for shutdown.
    pub fn into_inner(self) -> Option<Driver<T>> {
        Arc::try_unwrap(self.inner).ok().map(Mutex::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;
    use crate::config::DriverConfig;
    use crate::transport::SimService;

    #[test]
    fn threads_share_one_endpoint() {
        let driver = Driver::new(SimService::new(3), DriverConfig::default()).unwrap();
        let shared = SharedDriver::new(driver);

        let workers: Vec<_> = (0..4u8)
            .map(|i| {
                let shared = shared.clone();
                thread::spawn(move || {
                    let fh = shared.open(&format!("file_{}", i)).unwrap();
                    let data = vec![i; 1500];
                    shared.write(fh, &data).unwrap();

                    let mut buf = vec![0u8; 1500];
                    let n = shared.with(|d| {
                        d.seek(fh, 0)?;
                        d.read(fh, &mut buf)
                    });
                    assert_eq!(n.unwrap(), 1500);
                    assert_eq!(buf, data);
                })
            })
            .collect();
        for w in workers {
            w.join().unwrap();
        }

        let driver = shared.into_inner().unwrap();
        assert_eq!(driver.transport().stats().inits, 1);
        assert_eq!(driver.transport().stats().creates, 8);
        driver.shutdown().unwrap();
    }

    #[test]
    fn into_inner_needs_last_handle() {
        let driver = Driver::new(SimService::new(1), DriverConfig::default()).unwrap();
        let shared = SharedDriver::new(driver);
        let other = shared.clone();
        assert!(shared.into_inner().is_none());
        assert!(other.into_inner().is_some());
    }
}
