use std::net::Ipv4Addr;
use std::path::Path;

use log::error;
use utils::error::*;

/// One CIDR entry: the network address plus the host-bits mask, both in host
/// byte order. An address belongs to the entry iff it agrees with `net` on
/// every bit outside `host`.
#[derive(Clone, Copy)]
struct NetMask {
	net: u32,
	host: u32,
}

impl NetMask {
	fn parse(s: &str) -> Option<Self> {
		let (addr, len) = match s.split_once('/') {
			Some((addr, len)) => (addr, len.parse().ok().filter(|l| *l <= 32)?),
			None => (s, 32u32),
		};

		let net = addr.parse::<Ipv4Addr>().ok()?;

		Some(Self {
			net: net.into(),
			host: ((1u64 << (32 - len)) - 1) as u32,
		})
	}
}

/// Sorted list of IPv4 networks, built once at startup and consulted for every
/// answer record thereafter.
#[derive(Default)]
pub struct RouteTable {
	nets: Vec<NetMask>,
}

impl RouteTable {
	/// Read a route file: one `a.b.c.d[/len]` per line, CR/LF tolerated,
	/// blank lines skipped.
	pub fn load(path: &Path) -> Result<Self> {
		let data = std::fs::read_to_string(path).map_err(|err| error!("Can't open {}: {err}", path.display()))?;

		Self::build(data.lines()).map_err(|line| error!("Invalid network on line {line} of {}", path.display()))
	}

	/// Parse and sort route lines. On failure the 1-based number of the
	/// offending line is returned.
	pub fn build<'a>(lines: impl Iterator<Item = &'a str>) -> Result<Self, usize> {
		let mut nets = Vec::new();

		for (i, line) in lines.enumerate() {
			let line = line.trim_end_matches('\r');

			if line.is_empty() {
				continue;
			}

			nets.push(NetMask::parse(line).ok_or(i + 1)?);
		}

		nets.sort_unstable_by_key(|n| n.net);
		nets.dedup_by_key(|n| n.net);

		Ok(Self { nets })
	}

	/// Whether `addr` falls within any of the listed networks.
	pub fn contains(&self, addr: Ipv4Addr) -> bool {
		let addr = u32::from(addr);

		// The candidate is the greatest entry whose network address is <= addr.
		let idx = self.nets.partition_point(|n| n.net <= addr);

		match idx.checked_sub(1).and_then(|i| self.nets.get(i)) {
			Some(n) => (n.net ^ addr) & !n.host == 0,
			None => false,
		}
	}

	pub fn len(&self) -> usize {
		self.nets.len()
	}

	pub fn is_empty(&self) -> bool {
		self.nets.is_empty()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn table(lines: &[&str]) -> RouteTable {
		RouteTable::build(lines.iter().copied()).unwrap()
	}

	fn addr(s: &str) -> Ipv4Addr {
		s.parse().unwrap()
	}

	#[test]
	fn lookups() {
		let t = table(&["1.0.0.0/8", "8.8.8.0/24"]);

		assert!(t.contains(addr("1.2.3.4")));
		assert!(t.contains(addr("8.8.8.8")));
		assert!(!t.contains(addr("8.8.9.1")));
		assert!(!t.contains(addr("9.9.9.9")));
	}

	#[test]
	fn network_address_itself_matches() {
		let t = table(&["10.0.0.0/8"]);

		assert!(t.contains(addr("10.0.0.0")));
		assert!(t.contains(addr("10.255.255.255")));
		assert!(!t.contains(addr("11.0.0.0")));
	}

	#[test]
	fn zero_length_prefix_matches_everything() {
		let t = table(&["0.0.0.0/0"]);

		assert!(t.contains(addr("0.0.0.0")));
		assert!(t.contains(addr("127.0.0.1")));
		assert!(t.contains(addr("255.255.255.255")));
	}

	#[test]
	fn missing_length_means_host_route() {
		let t = table(&["203.0.113.7"]);

		assert!(t.contains(addr("203.0.113.7")));
		assert!(!t.contains(addr("203.0.113.6")));
		assert!(!t.contains(addr("203.0.113.8")));
	}

	#[test]
	fn empty_table_matches_nothing() {
		let t = RouteTable::default();

		assert!(!t.contains(addr("1.2.3.4")));
	}

	#[test]
	fn unsorted_input_is_sorted() {
		let t = table(&["8.8.8.0/24", "1.0.0.0/8"]);

		assert!(t.contains(addr("1.2.3.4")));
		assert!(t.contains(addr("8.8.8.8")));
	}

	#[test]
	fn carriage_returns_are_tolerated() {
		let t = table(&["1.0.0.0/8\r", "", "8.8.8.0/24\r"]);

		assert_eq!(t.len(), 2);
		assert!(t.contains(addr("8.8.8.1")));
	}

	#[test]
	fn bad_lines_are_reported() {
		assert_eq!(RouteTable::build(["1.0.0.0/8", "bogus"].into_iter()).err(), Some(2));
		assert_eq!(RouteTable::build(["300.0.0.1"].into_iter()).err(), Some(1));
		assert_eq!(RouteTable::build(["1.0.0.0/33"].into_iter()).err(), Some(1));
	}

	#[test]
	fn duplicate_networks_collapse() {
		let t = table(&["1.0.0.0/8", "1.0.0.0/8"]);

		assert_eq!(t.len(), 1);
	}
}
