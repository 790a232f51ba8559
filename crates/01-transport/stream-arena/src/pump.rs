//! Moves bytes between the channel and ordinary byte streams.
//!
//! A producer pulls straight from a [`ByteSource`] into its reserved region and
//! a consumer pushes a borrowed region straight into a [`ByteSink`], so neither
//! side stages the payload in an intermediate buffer.

use std::io;
use std::time::Duration;

use tracing::trace;

use crate::channel::{Consumer, Producer};
use crate::PumpError;

/// Something that can fill a byte slice, such as a device FIFO or a socket.
pub trait ByteSource {
    /// Fills a prefix of `buf`, returning how many bytes were written. Zero
    /// means the source has nothing more right now.
    fn fill(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

impl<R: io::Read + ?Sized> ByteSource for R {
    fn fill(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            match self.read(buf) {
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                other => return other,
            }
        }
    }
}

/// Something that accepts whole byte slices.
pub trait ByteSink {
    fn consume(&mut self, bytes: &[u8]) -> io::Result<()>;
}

impl<W: io::Write + ?Sized> ByteSink for W {
    fn consume(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.write_all(bytes)
    }
}

impl Producer {
    /// Reserves up to `max_len` bytes and fills them from `source` until the
    /// source reports zero or the region is full. Returns the bytes published.
    ///
    /// On an I/O error the bytes already accounted are still published.
    pub fn pump_from<S>(
        &mut self,
        source: &mut S,
        max_len: usize,
        timeout: Duration,
    ) -> Result<usize, PumpError>
    where
        S: ByteSource + ?Sized,
    {
        let mut grant = self.write_open(max_len, timeout)?;
        while grant.filled() < grant.len() {
            let filled = grant.filled();
            let n = source.fill(grant.unfilled())?;
            if n == 0 {
                break;
            }
            grant.write(filled, n)?;
        }
        let published = grant.close()?;
        trace!(published, "pumped from source");
        Ok(published)
    }
}

impl Consumer {
    /// Borrows up to `len` bytes (exactly `len` with `exact`) and hands them to
    /// `sink`. The bytes are released even when the sink fails.
    pub fn pump_into<K>(
        &mut self,
        sink: &mut K,
        len: usize,
        exact: bool,
        timeout: Duration,
    ) -> Result<usize, PumpError>
    where
        K: ByteSink + ?Sized,
    {
        let grant = self.read_open(len, exact, timeout)?;
        sink.consume(&grant)?;
        let released = grant.close()?;
        trace!(released, "pumped into sink");
        Ok(released)
    }
}
