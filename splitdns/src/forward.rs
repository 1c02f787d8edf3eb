use std::net::{SocketAddrV4, UdpSocket};

use log::debug;
use runtime::Io;
use stakker::{fwd_to, CX};

use crate::filter::Policy;
use crate::pending::PendingTable;
use crate::upstream::Upstreams;
use crate::wire;

/// Queries at most this long are forwarded without the compression-pointer
/// rewrite: there is no room for a question in them anyway.
const MIN_REWRITE: usize = 16;

/// The forwarding engine: one socket facing clients, one facing upstreams,
/// and the in-flight table correlating traffic between them.
pub struct Forwarder {
	local: Io<UdpSocket>,
	remote: Io<UdpSocket>,
	pending: PendingTable,
	upstreams: Upstreams,
	policy: Policy,
}

impl Forwarder {
	pub fn init(cx: CX![], local: UdpSocket, remote: UdpSocket, upstreams: Upstreams, policy: Policy) -> Option<Self> {
		// The local socket registers first: within one readiness wait, client
		// queries are dispatched before upstream responses are consumed.
		let local = Io::new(local, fwd_to!([cx], client() as (SocketAddrV4, Box<[u8]>)));
		let remote = Io::new(remote, fwd_to!([cx], upstream() as (SocketAddrV4, Box<[u8]>)));

		Some(Self {
			local,
			remote,
			pending: PendingTable::default(),
			upstreams,
			policy,
		})
	}

	/// A query from a client: remember it, fan it out.
	fn client(&mut self, _cx: CX![], src: SocketAddrV4, buf: Box<[u8]>) {
		let Some(header) = wire::header(&buf) else {
			debug!("Dropping malformed datagram from {src}");
			return;
		};

		match wire::question(&buf) {
			Some(name) => debug!("request {name}"),
			None => debug!("request from {src} without a question"),
		}

		self.pending.insert(header.id(), src);

		// Foreign servers get the pointer-rewritten form when the question
		// allows it.
		let rewrite = (buf.len() > MIN_REWRITE).then(|| wire::add_compression_pointer(&buf)).flatten();

		self.fan_out(rewrite.as_deref().unwrap_or(&buf), &self.upstreams.foreign);
		self.fan_out(&buf, &self.upstreams.domestic);
	}

	/// A response from an upstream: correlate, filter, relay.
	fn upstream(&mut self, _cx: CX![], src: SocketAddrV4, buf: Box<[u8]>) {
		let Some(header) = wire::header(&buf) else {
			debug!("Dropping malformed datagram from {src}");
			return;
		};

		let id = header.id();
		let rcode = header.rcode();
		let name = wire::question(&buf).unwrap_or_default();

		let Some(client) = self.pending.lookup(id) else {
			debug!("response {name} ({rcode:?}) from {src}: skip");
			return;
		};

		if self.policy.should_drop(&buf, *src.ip(), &self.upstreams) {
			debug!("response {name} ({rcode:?}) from {src}: filter");
			return;
		}

		debug!("response {name} ({rcode:?}) from {src}: pass");
		self.local.send_to(&buf, client);
	}

	fn fan_out(&self, buf: &[u8], servers: &[SocketAddrV4]) {
		for server in servers {
			self.remote.send_to(buf, *server);
		}
	}
}
