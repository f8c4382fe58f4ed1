/*
 * raftkv is a single replica of a replicated in-memory key/value store. It
 * takes the simulator's UDP port, its own replica ID, and the IDs of its
 * peers on the command line, then runs a Raft consensus node indefinitely,
 * exchanging JSON datagrams with its peers and clients via the simulator.
 */

#![warn(clippy::all)]

use raftkv::error::Result;
use raftkv::raft;

fn main() -> Result<()> {
    let args = clap::command!()
        .arg(
            clap::Arg::new("port")
                .required(true)
                .value_parser(clap::value_parser!(u16))
                .help("UDP port of the datagram simulator"),
        )
        .arg(clap::Arg::new("id").required(true).help("ID of this replica"))
        .arg(
            clap::Arg::new("peers")
                .required(true)
                .num_args(1..)
                .help("IDs of the other replicas"),
        )
        .arg(
            clap::Arg::new("log-level")
                .long("log-level")
                .default_value("info")
                .help("Log level"),
        )
        .get_matches();

    let loglevel = args.get_one::<String>("log-level").unwrap().parse::<simplelog::LevelFilter>()?;
    let mut logconfig = simplelog::ConfigBuilder::new();
    if loglevel != simplelog::LevelFilter::Debug {
        logconfig.add_filter_allow_str("raftkv");
    }
    simplelog::SimpleLogger::init(loglevel, logconfig.build())?;

    let port = *args.get_one::<u16>("port").unwrap();
    let id = args.get_one::<String>("id").unwrap().clone();
    let peers = args.get_many::<String>("peers").unwrap().cloned().collect();

    raft::Server::new(id, peers, port)?.serve()
}
