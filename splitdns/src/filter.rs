use std::net::Ipv4Addr;

use log::debug;

use crate::route::RouteTable;
use crate::upstream::Upstreams;
use crate::wire;

/// Decides which upstream responses are believable.
///
/// The injector sits near the border and answers faster than any genuine
/// foreign resolver, so for a poisoned name the first response through a
/// domestic resolver carries an address outside the domestic ranges. Those are
/// always rejected. With `bidirectional`, the symmetric case is rejected too:
/// a foreign resolver handing out an address inside the domestic ranges.
pub struct Policy {
	pub table: RouteTable,
	/// Whether a route file was configured at all.
	pub filtering: bool,
	/// Also reject foreign-server answers that point into the domestic ranges.
	pub bidirectional: bool,
}

impl Policy {
	/// Whether a response should be withheld from the client. Decides on the
	/// first offending A record; responses without A records always pass.
	pub fn should_drop(&self, buf: &[u8], server: Ipv4Addr, upstreams: &Upstreams) -> bool {
		let server_is_domestic = self.filtering && !upstreams.foreign.is_empty() && upstreams.is_domestic(server);

		for addr in wire::a_records(buf) {
			debug!("answer {addr}");

			match self.table.contains(addr) {
				// A domestic address from a foreign server.
				true if !server_is_domestic => {
					if self.bidirectional {
						return true;
					}
				}
				// A foreign address from a domestic server.
				false if server_is_domestic => return true,
				_ => {}
			}
		}

		false
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::upstream::Upstreams;
	use crate::wire::build::response;
	use crate::wire::TY_A;

	const DOMESTIC_DNS: &str = "114.114.114.114";
	const FOREIGN_DNS: &str = "8.8.8.8";

	const DOMESTIC_IP: &[u8] = &[203, 0, 113, 5];
	const FOREIGN_IP: &[u8] = &[93, 184, 216, 34];

	fn setup(bidirectional: bool) -> (Policy, Upstreams) {
		let table = RouteTable::build(["114.114.0.0/16", "203.0.113.0/24"].into_iter()).unwrap();
		let upstreams = Upstreams::build("114.114.114.114,8.8.8.8", &table, true).unwrap();

		(Policy { table, filtering: true, bidirectional }, upstreams)
	}

	fn drops(policy: &Policy, upstreams: &Upstreams, server: &str, answers: &[(u16, &[u8])]) -> bool {
		let buf = response(1, "example.com", answers);

		policy.should_drop(&buf, server.parse().unwrap(), upstreams)
	}

	#[test]
	fn foreign_answer_from_domestic_server_drops() {
		let (policy, upstreams) = setup(false);

		assert!(drops(&policy, &upstreams, DOMESTIC_DNS, &[(TY_A, FOREIGN_IP)]));
	}

	#[test]
	fn matching_classes_pass() {
		let (policy, upstreams) = setup(true);

		assert!(!drops(&policy, &upstreams, DOMESTIC_DNS, &[(TY_A, DOMESTIC_IP)]));
		assert!(!drops(&policy, &upstreams, FOREIGN_DNS, &[(TY_A, FOREIGN_IP)]));
	}

	#[test]
	fn domestic_answer_from_foreign_server_needs_bidirectional() {
		let (policy, upstreams) = setup(false);

		assert!(!drops(&policy, &upstreams, FOREIGN_DNS, &[(TY_A, DOMESTIC_IP)]));

		let (policy, upstreams) = setup(true);

		assert!(drops(&policy, &upstreams, FOREIGN_DNS, &[(TY_A, DOMESTIC_IP)]));
	}

	#[test]
	fn answerless_responses_pass() {
		let (policy, upstreams) = setup(true);

		assert!(!drops(&policy, &upstreams, DOMESTIC_DNS, &[]));
		assert!(!drops(&policy, &upstreams, FOREIGN_DNS, &[(28, &[0; 16])]));
	}

	#[test]
	fn one_offending_record_is_enough() {
		let (policy, upstreams) = setup(false);

		assert!(drops(&policy, &upstreams, DOMESTIC_DNS, &[(TY_A, DOMESTIC_IP), (TY_A, FOREIGN_IP)]));
	}

	#[test]
	fn bidirectional_only_adds_drops() {
		// Every combination dropped without -d is still dropped with it.
		let cases: &[(&str, &[u8])] = &[
			(DOMESTIC_DNS, DOMESTIC_IP),
			(DOMESTIC_DNS, FOREIGN_IP),
			(FOREIGN_DNS, DOMESTIC_IP),
			(FOREIGN_DNS, FOREIGN_IP),
		];

		for &(server, ip) in cases {
			let (uni, upstreams) = setup(false);
			let (bi, _) = setup(true);

			if drops(&uni, &upstreams, server, &[(TY_A, ip)]) {
				assert!(drops(&bi, &upstreams, server, &[(TY_A, ip)]));
			}
		}
	}

	#[test]
	fn disabled_filtering_passes_everything() {
		let policy = Policy { table: RouteTable::default(), filtering: false, bidirectional: false };
		let upstreams = Upstreams::build("114.114.114.114,8.8.8.8", &RouteTable::default(), false).unwrap();

		assert!(!drops(&policy, &upstreams, DOMESTIC_DNS, &[(TY_A, DOMESTIC_IP)]));
		assert!(!drops(&policy, &upstreams, FOREIGN_DNS, &[(TY_A, FOREIGN_IP)]));
		assert!(!drops(&policy, &upstreams, DOMESTIC_DNS, &[(TY_A, FOREIGN_IP)]));
	}

	#[test]
	fn without_a_foreign_pool_there_is_no_race_to_referee() {
		let table = RouteTable::build(["114.114.0.0/16", "203.0.113.0/24"].into_iter()).unwrap();
		let upstreams = Upstreams::build("114.114.114.114,114.114.115.115", &table, false).unwrap();
		let policy = Policy { table, filtering: true, bidirectional: false };

		// A foreign answer from a domestic server would normally drop, but
		// with no foreign pool there is nothing to race against.
		assert!(!drops(&policy, &upstreams, DOMESTIC_DNS, &[(TY_A, FOREIGN_IP)]));
	}
}
