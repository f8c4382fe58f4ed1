mod log;
mod message;
mod node;
mod server;
mod state;

pub use self::log::{Entry, Index, Log};
pub use message::{Envelope, Message, BROADCAST, NO_PREV_ENTRY};
pub use node::{Node, NodeID, Status, Term};
pub use server::Server;
pub use state::KvState;

use std::time::Duration;

/// The interval between AppendEntries sends to each peer while leader.
/// Must be well below the minimum election timeout.
const HEARTBEAT_INTERVAL: Duration = Duration::from_millis(100);

/// The election timeout range in milliseconds. A deadline is drawn
/// uniformly from this range on every transition to follower or candidate,
/// so that concurrent candidates rarely tie.
const ELECTION_TIMEOUT_MS: std::ops::Range<u64> = 500..1000;

/// The maximum time the event loop waits for an inbound datagram. Bounds
/// the reaction latency to deadlines when the network is quiet.
const POLL_INTERVAL: Duration = Duration::from_millis(200);
