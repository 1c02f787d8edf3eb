use core::cell::RefCell;
use core::mem::size_of;
use core::time::Duration;
use std::collections::VecDeque;
use std::io::{self, ErrorKind};
use std::net::{Ipv4Addr, SocketAddrV4};

use log::{error, warn};
use stakker::Fwd;

pub mod logger;
mod rt;

pub use rt::*;

/// Maximum size of a UDP datagram we are willing to carry.
pub const DATAGRAM: usize = 512;

#[cfg(target_family = "unix")]
mod sys {
	pub use std::os::fd::{AsRawFd, RawFd};

	pub use libc::{poll, pollfd as Poll, POLLERR, POLLHUP, POLLIN, POLLNVAL, POLLOUT};

	pub fn as_raw<T: AsRawFd>(t: &T) -> RawFd {
		t.as_raw_fd()
	}
}

pub use sys::AsRawFd;
use sys::*;
use utils::error::*;

fn as_timeout(t: Option<Duration>) -> i32 {
	t.and_then(|d| d.as_millis().try_into().ok()).unwrap_or(-1)
}

fn to_sockaddr(addr: SocketAddrV4) -> libc::sockaddr_in {
	let mut sin: libc::sockaddr_in = unsafe { core::mem::zeroed() };

	sin.sin_family = libc::AF_INET as libc::sa_family_t;
	sin.sin_port = addr.port().to_be();
	sin.sin_addr = libc::in_addr { s_addr: u32::from(*addr.ip()).to_be() };

	sin
}

fn from_sockaddr(storage: &libc::sockaddr_storage) -> Option<SocketAddrV4> {
	if storage.ss_family != libc::AF_INET as libc::sa_family_t {
		return None;
	}

	let sin = unsafe { &*(storage as *const libc::sockaddr_storage as *const libc::sockaddr_in) };

	Some(SocketAddrV4::new(Ipv4Addr::from(u32::from_be(sin.sin_addr.s_addr)), u16::from_be(sin.sin_port)))
}

/// Receive one datagram. Returns `None` once the socket has drained, and on
/// receive errors, which are logged and survivable.
fn recv_from(fd: RawFd, buf: &mut [u8]) -> Option<(usize, SocketAddrV4)> {
	let mut storage: libc::sockaddr_storage = unsafe { core::mem::zeroed() };
	let mut addrlen = size_of::<libc::sockaddr_storage>() as libc::socklen_t;

	let r = unsafe {
		libc::recvfrom(
			fd,
			buf.as_mut_ptr().cast(),
			buf.len(),
			0,
			(&mut storage as *mut libc::sockaddr_storage).cast(),
			&mut addrlen,
		)
	};

	let Ok(n) = usize::try_from(r) else {
		let err = io::Error::last_os_error();

		if !matches!(err.kind(), ErrorKind::WouldBlock) {
			warn!("recvfrom() failed: {err}");
		}

		return None;
	};

	from_sockaddr(&storage).map(|src| (n, src))
}

/// Send one datagram. `Ok(false)` means the socket is not ready and the caller
/// should queue; a real failure is logged and reported as `Err`, and the
/// datagram is simply lost.
fn send_to(fd: RawFd, buf: &[u8], dst: SocketAddrV4) -> Result<bool> {
	let sin = to_sockaddr(dst);

	let r = unsafe {
		libc::sendto(
			fd,
			buf.as_ptr().cast(),
			buf.len(),
			0,
			(&sin as *const libc::sockaddr_in).cast(),
			size_of::<libc::sockaddr_in>() as libc::socklen_t,
		)
	};

	match usize::try_from(r) {
		Ok(n) if n == buf.len() => Ok(true),
		Ok(n) => {
			warn!("Only sent {}/{} bytes to {}", n, buf.len(), dst);
			Err(())
		}
		Err(_) => {
			let err = io::Error::last_os_error();

			if matches!(err.kind(), ErrorKind::WouldBlock) {
				return Ok(false);
			}

			warn!("sendto {dst} failed: {err}");
			Err(())
		}
	}
}

thread_local! {
	static GLOBAL: RefCell<State> = const {
		RefCell::new(State {
			fds: Vec::new(),
			entries: Vec::new(),
			stats: Stats { polls: 0, rx: 0, tx: 0 },
		})
	};
}

struct Stats {
	polls: u64,
	rx: u64,
	tx: u64,
}

struct State {
	fds: Vec<Poll>,
	entries: Vec<Entry>,
	stats: Stats,
}

impl State {
	fn with<X, F: FnOnce(&mut Self) -> X>(f: F) -> X {
		GLOBAL.with(|x| f(&mut x.borrow_mut()))
	}

	fn idx_of<T: AsRawFd>(&mut self, socket: &T) -> usize {
		let raw = as_raw(socket);
		self.fds.iter().position(|f| f.fd == raw).expect("Socket is present")
	}

	/// Returns whether any more I/O is waiting.
	fn is_io(&self) -> bool {
		!self.fds.is_empty()
	}

	fn log_stats(&self) {
		log::debug!(
			"{} ready wakeups, {} datagrams received, {} datagrams sent",
			self.stats.polls,
			self.stats.rx,
			self.stats.tx
		);
	}

	/// Poll the fds. Returns whether any file descriptors are ready for I/O.
	///
	/// Sockets are serviced in registration order, so readiness on an earlier
	/// socket is always handled before readiness on a later one within the
	/// same wait.
	fn poll(&mut self, timeout: Option<Duration>) -> Result<bool> {
		let ret = unsafe {
			poll(
				self.fds.as_mut_ptr(),
				self.fds.len().try_into().expect("Fewer than u32::MAX fds"),
				as_timeout(timeout),
			)
		};

		let mut pending: u32 = ret.try_into().map_err(|_| error!("poll() failed: {}", io::Error::last_os_error()))?;

		if pending == 0 {
			return Ok(false);
		}

		self.stats.polls += 1;

		for idx in 0..self.fds.len() {
			let Poll { fd, events, revents } = &mut self.fds[idx];
			let entry = &mut self.entries[idx];

			if *revents == 0 {
				continue;
			}

			if *revents & (POLLERR | POLLHUP | POLLNVAL) != 0 {
				error!("Socket error while polling");
				return Err(());
			}

			if *revents & POLLIN != 0 {
				self.stats.rx += entry.flush_read(*fd);
			}

			if *revents & POLLOUT != 0 {
				self.stats.tx += entry.flush_write(*fd);
			};

			*events = POLLIN;

			if !entry.queue.is_empty() {
				*events |= POLLOUT;
			}

			*revents = 0;

			pending -= 1;

			if pending == 0 {
				break;
			}
		}

		Ok(true)
	}
}

struct Entry {
	fwd: Fwd<(SocketAddrV4, Box<[u8]>)>,
	queue: VecDeque<(SocketAddrV4, Box<[u8]>)>,
}

impl Entry {
	fn flush_read(&mut self, fd: RawFd) -> u64 {
		let mut count = 0;
		let mut buf = [0u8; DATAGRAM];

		while let Some((n, src)) = recv_from(fd, &mut buf) {
			self.fwd.fwd((src, buf[..n].into()));
			count += 1;
		}

		count
	}

	fn flush_write(&mut self, fd: RawFd) -> u64 {
		let mut count = 0;

		while let Some((dst, buf)) = self.queue.back() {
			match send_to(fd, buf, *dst) {
				Ok(true) => count += 1,
				Ok(false) => break,
				// Logged by send_to. The datagram is lost, the client will
				// retry.
				Err(()) => {}
			}

			self.queue.pop_back();
		}

		count
	}
}

pub struct Io<T: AsRawFd> {
	inner: T,
}

impl<T: AsRawFd> Io<T> {
	pub fn new(inner: T, fwd: Fwd<(SocketAddrV4, Box<[u8]>)>) -> Self {
		State::with(|i| {
			i.fds.push(Poll { fd: as_raw(&inner), events: POLLIN, revents: 0 });

			i.entries.push(Entry { fwd, queue: VecDeque::new() });

			Self { inner }
		})
	}

	/// Send a datagram, queueing it until the next writability wakeup if the
	/// socket is not ready.
	pub fn send_to(&self, buf: &[u8], dst: SocketAddrV4) {
		State::with(|i| {
			let idx = i.idx_of(&self.inner);

			match send_to(i.fds[idx].fd, buf, dst) {
				Ok(true) => i.stats.tx += 1,
				Ok(false) => {
					i.entries[idx].queue.push_front((dst, buf.into()));
					i.fds[idx].events |= POLLOUT;
				}
				Err(()) => {}
			}
		})
	}
}

impl<T: AsRawFd> Drop for Io<T> {
	fn drop(&mut self) {
		State::with(|i| {
			let idx = i.idx_of(&self.inner);
			i.entries.swap_remove(idx);
			i.fds.swap_remove(idx);
		})
	}
}
