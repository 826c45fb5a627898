pub mod aggregator;

pub use aggregator::{ClusterAggregator, Peer, PeerError};
