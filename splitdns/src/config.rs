use std::net::Ipv4Addr;
use std::path::PathBuf;

use clap::Parser;

/// A mix of domestic and foreign public resolvers, queried when no explicit
/// server list is given.
const DEFAULT_SERVERS: &str = "114.114.114.114,8.8.8.8,8.8.4.4,208.67.222.222:443,208.67.222.222:5353";

/// Forward DNS requests, filtering answers whose location does not match the
/// class of the resolver that produced them.
#[derive(Parser, Debug)]
#[command(version)]
pub struct Config {
	/// Address that listens
	#[arg(short = 'b', value_name = "BIND_ADDR", default_value_t = Ipv4Addr::UNSPECIFIED)]
	pub bind_addr: Ipv4Addr,

	/// Port that listens
	#[arg(short = 'p', value_name = "BIND_PORT", default_value_t = 53)]
	pub bind_port: u16,

	/// DNS servers to use, in the format "ip:port,ip:port"
	#[arg(short = 's', value_name = "DNS", default_value = DEFAULT_SERVERS)]
	pub servers: String,

	/// Path to the domestic route file; without it, filtering is turned off
	#[arg(short = 'c', value_name = "ROUTE_FILE")]
	pub route_file: Option<PathBuf>,

	/// Enable the bi-directional filter
	#[arg(short = 'd')]
	pub bidirectional: bool,

	/// Verbose logging
	#[arg(short = 'v')]
	pub verbose: bool,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn defaults() {
		let config = Config::try_parse_from(["splitdns"]).unwrap();

		assert_eq!(config.bind_addr, Ipv4Addr::UNSPECIFIED);
		assert_eq!(config.bind_port, 53);
		assert_eq!(config.servers, DEFAULT_SERVERS);
		assert!(config.route_file.is_none());
		assert!(!config.bidirectional);
		assert!(!config.verbose);
	}

	#[test]
	fn short_flags() {
		let config = Config::try_parse_from([
			"splitdns", "-b", "127.0.0.1", "-p", "5300", "-s", "1.2.3.4:53", "-c", "route.txt", "-d", "-v",
		])
		.unwrap();

		assert_eq!(config.bind_addr, Ipv4Addr::new(127, 0, 0, 1));
		assert_eq!(config.bind_port, 5300);
		assert_eq!(config.servers, "1.2.3.4:53");
		assert_eq!(config.route_file.as_deref(), Some(std::path::Path::new("route.txt")));
		assert!(config.bidirectional);
		assert!(config.verbose);
	}
}
