//! Transport abstraction: any byte-oriented channel.
//!
//! Remote sessions run over a `Transport`: a socket, a pipe, a serial
//! line. [`MemoryPipe`] is an in-process duplex used by tests and the
//! demo host. Adding a transport requires no change to the binding
//! layer.

use core::cell::RefCell;
use std::collections::VecDeque;
use std::sync::Arc;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;

use crate::error::ChannelError;

/// Byte-oriented transport channel.
pub trait Transport {
    /// Error type for this transport.
    type Error: core::fmt::Debug;

    /// Read up to `buf.len()` bytes into `buf`.
    /// Returns the number of bytes actually read.
    /// Returns 0 if no data is available (non-blocking).
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error>;

    /// Write `data` to the transport.
    /// Returns the number of bytes actually written.
    fn write(&mut self, data: &[u8]) -> Result<usize, Self::Error>;

    /// Flush any buffered output.
    fn flush(&mut self) -> Result<(), Self::Error>;

    /// Check if data is available for reading.
    fn available(&self) -> bool;

    /// Tear the link down. Later reads and writes on either end fail.
    fn close(&mut self) {}
}

/// Write all of `data`, treating a zero-length write as a dead link.
pub fn write_all<T: Transport>(t: &mut T, mut data: &[u8]) -> Result<(), ChannelError> {
    while !data.is_empty() {
        match t.write(data) {
            Ok(0) | Err(_) => return Err(ChannelError::Transport),
            Ok(n) => data = &data[n..],
        }
    }
    t.flush().map_err(|_| ChannelError::Transport)
}

// ── In-memory duplex ─────────────────────────────────────────

#[derive(Default)]
struct PipeState {
    a_to_b: VecDeque<u8>,
    b_to_a: VecDeque<u8>,
    closed: bool,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum End {
    A,
    B,
}

/// One end of an in-memory byte pipe.
pub struct MemoryPipe {
    shared: Arc<Mutex<CriticalSectionRawMutex, RefCell<PipeState>>>,
    end: End,
}

impl MemoryPipe {
    /// Two connected ends.
    pub fn pair() -> (Self, Self) {
        let shared = Arc::new(Mutex::new(RefCell::new(PipeState::default())));
        (
            Self {
                shared: shared.clone(),
                end: End::A,
            },
            Self { shared, end: End::B },
        )
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock(|s| s.borrow().closed)
    }
}

impl Transport for MemoryPipe {
    type Error = ChannelError;

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, ChannelError> {
        self.shared.lock(|s| {
            let mut s = s.borrow_mut();
            let closed = s.closed;
            let rx = match self.end {
                End::A => &mut s.b_to_a,
                End::B => &mut s.a_to_b,
            };
            if rx.is_empty() {
                return if closed { Err(ChannelError::Closed) } else { Ok(0) };
            }
            let n = buf.len().min(rx.len());
            for (dst, src) in buf.iter_mut().zip(rx.drain(..n)) {
                *dst = src;
            }
            Ok(n)
        })
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, ChannelError> {
        self.shared.lock(|s| {
            let mut s = s.borrow_mut();
            if s.closed {
                return Err(ChannelError::Closed);
            }
            let tx = match self.end {
                End::A => &mut s.a_to_b,
                End::B => &mut s.b_to_a,
            };
            tx.extend(data);
            Ok(data.len())
        })
    }

    fn flush(&mut self) -> Result<(), ChannelError> {
        Ok(())
    }

    fn available(&self) -> bool {
        self.shared.lock(|s| {
            let s = s.borrow();
            match self.end {
                End::A => !s.b_to_a.is_empty(),
                End::B => !s.a_to_b.is_empty(),
            }
        })
    }

    fn close(&mut self) {
        self.shared.lock(|s| s.borrow_mut().closed = true);
    }
}
