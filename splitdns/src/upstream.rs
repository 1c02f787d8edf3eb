use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, ToSocketAddrs};

use log::error;
use utils::error::*;

use crate::route::RouteTable;

const DEFAULT_PORT: u16 = 53;

/// The upstream resolvers, partitioned by whether their address lies inside
/// the domestic ranges.
#[derive(Default)]
pub struct Upstreams {
	pub domestic: Vec<SocketAddrV4>,
	pub foreign: Vec<SocketAddrV4>,
}

impl Upstreams {
	/// Resolve a comma-separated `host[:port]` list and classify each server
	/// against `table`. When filtering is active both classes must be
	/// represented, otherwise one side of every race would be unopposed.
	pub fn build(list: &str, table: &RouteTable, filtering: bool) -> Result<Self> {
		let mut this = Self::default();

		for token in list.split(',').filter(|t| !t.is_empty()) {
			// Split on the rightmost colon so a stray "host:port:port" fails
			// in resolution rather than in port parsing.
			let (host, port) = match token.rsplit_once(':') {
				Some((host, port)) => (host, port.parse().map_err(|_| error!("Invalid port in {token}"))?),
				None => (token, DEFAULT_PORT),
			};

			let addr = resolve(host, port).ok_or_else(|| error!("No IPv4 address for {token}"))?;

			if table.contains(*addr.ip()) {
				this.domestic.push(addr);
			} else {
				this.foreign.push(addr);
			}
		}

		if filtering && (this.domestic.is_empty() || this.foreign.is_empty()) {
			error!("At least one domestic and one foreign DNS server are needed when filtering is enabled");
			return Err(());
		}

		Ok(this)
	}

	/// Whether a response's source address belongs to a domestic server.
	/// Matching is by address only, ports are not compared.
	pub fn is_domestic(&self, addr: Ipv4Addr) -> bool {
		self.domestic.iter().any(|s| *s.ip() == addr)
	}
}

fn resolve(host: &str, port: u16) -> Option<SocketAddrV4> {
	(host, port)
		.to_socket_addrs()
		.ok_or(|err| error!("Can't resolve {host}: {err}"))?
		.find_map(|addr| match addr {
			SocketAddr::V4(v4) => Some(v4),
			SocketAddr::V6(_) => None,
		})
}

#[cfg(test)]
mod tests {
	use super::*;

	fn table(lines: &[&str]) -> RouteTable {
		RouteTable::build(lines.iter().copied()).unwrap()
	}

	#[test]
	fn default_port_is_filled_in() {
		let u = Upstreams::build("114.114.114.114,8.8.8.8:53", &RouteTable::default(), false).unwrap();

		// Without a route table every server is foreign.
		assert!(u.domestic.is_empty());
		assert_eq!(u.foreign.len(), 2);
		assert!(u.foreign.iter().all(|s| s.port() == 53));
	}

	#[test]
	fn explicit_ports_are_kept() {
		let u = Upstreams::build("208.67.222.222:443,208.67.222.222:5353", &RouteTable::default(), false).unwrap();

		assert_eq!(u.foreign[0].port(), 443);
		assert_eq!(u.foreign[1].port(), 5353);
	}

	#[test]
	fn classification_follows_the_table() {
		let t = table(&["114.114.0.0/16"]);
		let u = Upstreams::build("114.114.114.114,8.8.8.8", &t, true).unwrap();

		assert_eq!(u.domestic, vec!["114.114.114.114:53".parse().unwrap()]);
		assert_eq!(u.foreign, vec!["8.8.8.8:53".parse().unwrap()]);
	}

	#[test]
	fn filtering_requires_both_pools() {
		let t = table(&["114.114.0.0/16"]);

		assert!(Upstreams::build("8.8.8.8,8.8.4.4", &t, true).is_err());
		assert!(Upstreams::build("114.114.114.114", &t, true).is_err());

		// With filtering disabled a one-sided set is fine.
		assert!(Upstreams::build("8.8.8.8,8.8.4.4", &t, false).is_ok());
	}

	#[test]
	fn unresolvable_tokens_fail() {
		assert!(Upstreams::build("8.8.8.8:not-a-port", &RouteTable::default(), false).is_err());
		assert!(Upstreams::build("999.999.999.999", &RouteTable::default(), false).is_err());
	}

	#[test]
	fn source_matching_ignores_the_port() {
		let t = table(&["114.114.0.0/16"]);
		let u = Upstreams::build("114.114.114.114:5353,8.8.8.8", &t, true).unwrap();

		assert!(u.is_domestic("114.114.114.114".parse().unwrap()));
		assert!(!u.is_domestic("8.8.4.4".parse().unwrap()));
	}
}
