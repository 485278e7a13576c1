//! Socket primitives the connection engine is written against.
//!
//! [`Transport`] is the narrow send/recv surface: non-blocking calls that
//! return would-block instead of waiting. [`Readiness`] is how the reactor
//! waits for the socket to become readable or writable again. Plain TCP
//! implements both; a TLS overlay would only need to provide the same
//! semantics.

use crate::bucket::BucketChain;
use socket2::SockRef;
use std::future::Future;
use std::io;
use std::io::IoSlice;
use std::net::Shutdown;
use tokio::net::TcpStream;
use tracing::trace;

/// Non-blocking byte transport.
///
/// Every call either makes progress immediately or fails with
/// [`io::ErrorKind::WouldBlock`].
pub trait Transport {
    /// Reads into `buf`; `Ok(0)` is end of stream.
    ///
    /// # Errors
    ///
    /// `WouldBlock` when nothing is available, anything else is fatal.
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// One vectored write.
    ///
    /// # Errors
    ///
    /// `WouldBlock` when the send buffer is full, anything else is fatal.
    fn send_vectored(&mut self, bufs: &[IoSlice<'_>]) -> io::Result<usize>;

    /// Half-closes the connection: no more bytes will be sent.
    ///
    /// # Errors
    ///
    /// Fails if the socket is already gone.
    fn shutdown_write(&mut self) -> io::Result<()>;
}

/// Waits for readiness events on a [`Transport`].
pub trait Readiness {
    fn readable(&self) -> impl Future<Output = io::Result<()>>;

    fn writable(&self) -> impl Future<Output = io::Result<()>>;
}

impl Transport for TcpStream {
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.try_read(buf)
    }

    fn send_vectored(&mut self, bufs: &[IoSlice<'_>]) -> io::Result<usize> {
        self.try_write_vectored(bufs)
    }

    fn shutdown_write(&mut self) -> io::Result<()> {
        SockRef::from(&*self).shutdown(Shutdown::Write)
    }
}

impl Readiness for TcpStream {
    fn readable(&self) -> impl Future<Output = io::Result<()>> {
        TcpStream::readable(self)
    }

    fn writable(&self) -> impl Future<Output = io::Result<()>> {
        TcpStream::writable(self)
    }
}

/// Outcome of a [`send_chain`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStatus {
    /// the chain is empty
    Drained,
    /// bytes remain; keep write interest armed
    Pending,
}

/// Writes the head of `chain` with one vectored send of at most `max_iovec`
/// buckets.
///
/// Fully written buckets are dropped and a partially written one keeps its
/// new offset. Would-block and interrupted sends report
/// [`SendStatus::Pending`] and leave the chain untouched. A chain holding
/// only zero length buckets drains without a syscall.
///
/// # Errors
///
/// Any other send failure, including a send that accepts zero bytes.
pub fn send_chain<T: Transport + ?Sized>(io: &mut T, chain: &mut BucketChain, max_iovec: usize) -> io::Result<SendStatus> {
    if chain.total_length() == 0 {
        chain.clear();
        return Ok(SendStatus::Drained);
    }

    let written = {
        let mut slices = Vec::with_capacity(chain.len().min(max_iovec));
        chain.io_slices(&mut slices, max_iovec.max(1));
        match io.send_vectored(&slices) {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(n) => n,
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted) => {
                trace!(cause = %e, "send deferred");
                return Ok(SendStatus::Pending);
            }
            Err(e) => return Err(e),
        }
    };

    chain.consume(written);
    trace!(written, remaining = chain.total_length(), "vectored send");
    if chain.total_length() == 0 {
        chain.clear();
        Ok(SendStatus::Drained)
    } else {
        Ok(SendStatus::Pending)
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use super::Transport;
    use std::collections::VecDeque;
    use std::io;
    use std::io::IoSlice;

    /// What the next `send_vectored` call does.
    #[derive(Debug, Clone, Copy)]
    pub(crate) enum Step {
        Accept(usize),
        Block,
        Interrupt,
        Fail(io::ErrorKind),
    }

    /// In-memory transport that records writes and follows a script.
    ///
    /// Once the script runs out every send is accepted in full.
    #[derive(Debug, Default)]
    pub(crate) struct MockTransport {
        pub(crate) written: Vec<u8>,
        pub(crate) steps: VecDeque<Step>,
        pub(crate) input: VecDeque<u8>,
        pub(crate) shut: bool,
        pub(crate) calls: usize,
    }

    impl MockTransport {
        pub(crate) fn new() -> Self {
            Self::default()
        }

        pub(crate) fn with_steps(steps: impl IntoIterator<Item = Step>) -> Self {
            Self { steps: steps.into_iter().collect(), ..Self::default() }
        }

        pub(crate) fn take_written(&mut self) -> Vec<u8> {
            std::mem::take(&mut self.written)
        }
    }

    impl Transport for MockTransport {
        fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.input.is_empty() {
                return Err(io::ErrorKind::WouldBlock.into());
            }
            let n = buf.len().min(self.input.len());
            for (dst, src) in buf.iter_mut().zip(self.input.drain(..n)) {
                *dst = src;
            }
            Ok(n)
        }

        fn send_vectored(&mut self, bufs: &[IoSlice<'_>]) -> io::Result<usize> {
            self.calls += 1;
            let total: usize = bufs.iter().map(|b| b.len()).sum();
            let limit = match self.steps.pop_front() {
                None => total,
                Some(Step::Accept(n)) => n.min(total),
                Some(Step::Block) => return Err(io::ErrorKind::WouldBlock.into()),
                Some(Step::Interrupt) => return Err(io::ErrorKind::Interrupted.into()),
                Some(Step::Fail(kind)) => return Err(kind.into()),
            };

            let mut left = limit;
            for buf in bufs {
                let n = left.min(buf.len());
                self.written.extend_from_slice(&buf[..n]);
                left -= n;
                if left == 0 {
                    break;
                }
            }
            Ok(limit)
        }

        fn shutdown_write(&mut self) -> io::Result<()> {
            self.shut = true;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::{MockTransport, Step};
    use super::*;
    use crate::bucket::Bucket;
    use proptest::prelude::*;

    fn chain_of(parts: &[Vec<u8>]) -> BucketChain {
        parts.iter().map(|p| Bucket::copy(p)).collect()
    }

    #[test]
    fn drains_in_one_call() {
        let mut io = MockTransport::new();
        let mut chain: BucketChain = [&b"GET "[..], b"/ ", b"HTTP/1.1"].into_iter().collect();
        assert_eq!(send_chain(&mut io, &mut chain, 64).unwrap(), SendStatus::Drained);
        assert!(chain.is_empty());
        assert_eq!(io.written, b"GET / HTTP/1.1");
    }

    #[test]
    fn partial_send_resumes_at_offset() {
        let mut io = MockTransport::with_steps([Step::Accept(5)]);
        let mut chain: BucketChain = [&b"abc"[..], b"defg"].into_iter().collect();

        assert_eq!(send_chain(&mut io, &mut chain, 64).unwrap(), SendStatus::Pending);
        assert_eq!(chain.len(), 1);
        assert_eq!(chain.iter().next().map(Bucket::sent), Some(2));

        assert_eq!(send_chain(&mut io, &mut chain, 64).unwrap(), SendStatus::Drained);
        assert_eq!(io.written, b"abcdefg");
    }

    #[test]
    fn would_block_and_interrupt_leave_chain_untouched() {
        let mut io = MockTransport::with_steps([Step::Block, Step::Interrupt]);
        let mut chain: BucketChain = [&b"xy"[..]].into_iter().collect();

        assert_eq!(send_chain(&mut io, &mut chain, 64).unwrap(), SendStatus::Pending);
        assert_eq!(send_chain(&mut io, &mut chain, 64).unwrap(), SendStatus::Pending);
        assert_eq!(chain.total_length(), 2);
        assert_eq!(chain.iter().next().map(Bucket::sent), Some(0));
        assert!(io.written.is_empty());
    }

    #[test]
    fn hard_errors_propagate() {
        let mut io = MockTransport::with_steps([Step::Fail(io::ErrorKind::ConnectionReset)]);
        let mut chain: BucketChain = [&b"xy"[..]].into_iter().collect();
        let err = send_chain(&mut io, &mut chain, 64).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);
    }

    #[test]
    fn zero_byte_send_is_an_error() {
        let mut io = MockTransport::with_steps([Step::Accept(0)]);
        let mut chain: BucketChain = [&b"xy"[..]].into_iter().collect();
        let err = send_chain(&mut io, &mut chain, 64).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WriteZero);
    }

    #[test]
    fn empty_buckets_drain_without_syscall() {
        let mut io = MockTransport::new();
        let mut chain: BucketChain = [&b""[..], b""].into_iter().collect();
        assert_eq!(send_chain(&mut io, &mut chain, 64).unwrap(), SendStatus::Drained);
        assert!(chain.is_empty());
        assert_eq!(io.calls, 0);
    }

    #[test]
    fn iovec_bound_limits_one_send() {
        let mut io = MockTransport::new();
        let mut chain: BucketChain = [&b"a"[..], b"b", b"c", b"d"].into_iter().collect();
        assert_eq!(send_chain(&mut io, &mut chain, 3).unwrap(), SendStatus::Pending);
        assert_eq!(io.written, b"abc");
        assert_eq!(send_chain(&mut io, &mut chain, 3).unwrap(), SendStatus::Drained);
        assert_eq!(io.written, b"abcd");
    }

    proptest! {
        #[test]
        fn partial_sends_add_up(
            parts in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 0..64), 0..16),
            limits in proptest::collection::vec(1usize..48, 1..64),
        ) {
            let expected: Vec<u8> = parts.concat();
            let mut chain = chain_of(&parts);
            let mut io = MockTransport::with_steps(limits.into_iter().map(Step::Accept));

            let mut rounds = 0;
            loop {
                match send_chain(&mut io, &mut chain, 4).unwrap() {
                    SendStatus::Drained => break,
                    SendStatus::Pending => prop_assert!(!chain.is_empty()),
                }
                rounds += 1;
                prop_assert!(rounds < 10_000);
            }

            prop_assert!(chain.is_empty());
            prop_assert_eq!(io.written, expected);
        }
    }
}
