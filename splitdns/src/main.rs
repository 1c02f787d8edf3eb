use std::net::{Ipv4Addr, SocketAddrV4, UdpSocket};
use std::process::ExitCode;

use clap::Parser;
use log::{error, info};
use splitdns::config::Config;
use splitdns::filter::Policy;
use splitdns::forward::Forwarder;
use splitdns::route::RouteTable;
use splitdns::upstream::Upstreams;
use stakker::{actor, ret_nop};
use utils::error::*;

fn main() -> ExitCode {
	let config = match Config::try_parse() {
		Ok(config) => config,
		Err(err) => {
			let _ = err.print();
			return if err.use_stderr() { ExitCode::FAILURE } else { ExitCode::SUCCESS };
		}
	};

	runtime::logger::init(config.verbose);

	match run(config) {
		Ok(()) => ExitCode::SUCCESS,
		Err(()) => ExitCode::FAILURE,
	}
}

fn run(config: Config) -> Result {
	let table = match &config.route_file {
		Some(path) => {
			let table = RouteTable::load(path)?;
			info!("Loaded {} networks from {}", table.len(), path.display());
			table
		}
		None => {
			info!("No route file specified, filtering is disabled");
			RouteTable::default()
		}
	};

	let upstreams = Upstreams::build(&config.servers, &table, config.route_file.is_some())?;

	info!(
		"Forwarding to {} domestic and {} foreign servers",
		upstreams.domestic.len(),
		upstreams.foreign.len()
	);

	let local = bind(SocketAddrV4::new(config.bind_addr, config.bind_port))?;
	let remote = bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0))?;

	let policy = Policy {
		table,
		filtering: config.route_file.is_some(),
		bidirectional: config.bidirectional,
	};

	let mut stakker = runtime::init();

	let forwarder = actor!(stakker, Forwarder::init(local, remote, upstreams, policy), ret_nop!());

	info!("Listening on {}:{}", config.bind_addr, config.bind_port);

	runtime::exec(&mut stakker, move || drop(forwarder))
}

fn bind(addr: SocketAddrV4) -> Result<UdpSocket> {
	let socket = UdpSocket::bind(addr).map_err(|err| error!("Can't bind {addr}: {err}"))?;

	socket.set_nonblocking(true).map_err(|err| error!("Can't unblock {addr}: {err}"))?;

	Ok(socket)
}
