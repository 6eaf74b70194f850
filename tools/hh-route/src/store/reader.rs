//! Block reads with a bounded wait
//!
//! With a timeout configured, reads are handed to a small pool of reader
//! threads and the caller waits on a reply channel for at most that long.
//! A read that misses the deadline surfaces as `StorageTimeout`; the worker
//! finishes it in the background and its reply is dropped.

use std::io;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, RecvTimeoutError, Sender};
use hh_common::{Error, Result};
use tracing::{debug, warn};

use super::source::ByteSource;

struct ReadJob {
    offset: u64,
    len: usize,
    reply: Sender<io::Result<Vec<u8>>>,
}

pub enum BlockReader {
    Inline(Arc<dyn ByteSource>),
    Pooled(ReaderPool),
}

impl BlockReader {
    pub fn new(source: Arc<dyn ByteSource>, timeout: Option<Duration>, threads: usize) -> Result<Self> {
        match timeout {
            None => Ok(Self::Inline(source)),
            Some(timeout) => Ok(Self::Pooled(ReaderPool::spawn(source, timeout, threads)?)),
        }
    }

    /// Read `len` bytes at `offset` on behalf of `block`.
    pub fn read(&self, block: u32, offset: u64, len: usize) -> Result<Vec<u8>> {
        match self {
            Self::Inline(source) => {
                let mut buf = vec![0u8; len];
                source.read_at(offset, &mut buf)?;
                Ok(buf)
            }
            Self::Pooled(pool) => pool.read(block, offset, len),
        }
    }
}

pub struct ReaderPool {
    jobs: Option<Sender<ReadJob>>,
    workers: Vec<JoinHandle<()>>,
    timeout: Duration,
}

impl ReaderPool {
    pub fn spawn(source: Arc<dyn ByteSource>, timeout: Duration, threads: usize) -> Result<Self> {
        let (tx, rx) = unbounded::<ReadJob>();
        let workers = (0..threads.max(1))
            .map(|i| {
                let rx = rx.clone();
                let source = Arc::clone(&source);
                std::thread::Builder::new()
                    .name(format!("hh-reader-{i}"))
                    .spawn(move || {
                        for job in rx {
                            let mut buf = vec![0u8; job.len];
                            let result = source.read_at(job.offset, &mut buf).map(|_| buf);
                            // the caller may have given up already
                            let _ = job.reply.send(result);
                        }
                    })
            })
            .collect::<io::Result<Vec<_>>>()?;
        debug!(threads = workers.len(), timeout_ms = timeout.as_millis() as u64, "reader pool started");
        Ok(Self {
            jobs: Some(tx),
            workers,
            timeout,
        })
    }

    pub fn read(&self, block: u32, offset: u64, len: usize) -> Result<Vec<u8>> {
        let (reply, result) = bounded(1);
        let jobs = self
            .jobs
            .as_ref()
            .ok_or_else(|| Error::from(io::Error::other("reader pool shut down")))?;
        jobs.send(ReadJob { offset, len, reply })
            .map_err(|_| Error::from(io::Error::other("reader pool shut down")))?;
        match result.recv_timeout(self.timeout) {
            Ok(read) => Ok(read?),
            Err(RecvTimeoutError::Timeout) => {
                warn!(block, waited_ms = self.timeout.as_millis() as u64, "block read timed out");
                Err(Error::StorageTimeout {
                    block,
                    waited: self.timeout,
                })
            }
            Err(RecvTimeoutError::Disconnected) => {
                Err(io::Error::other("reader thread exited mid-read").into())
            }
        }
    }
}

impl Drop for ReaderPool {
    fn drop(&mut self) {
        self.jobs.take();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}
