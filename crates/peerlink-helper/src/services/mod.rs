//! Built-in RPC services.

pub mod node;
pub mod peers;
pub mod pubsub;
pub mod streams;

use std::sync::Arc;

use crate::dispatch::Dispatcher;

pub use node::NodeService;
pub use peers::PeerService;
pub use pubsub::PubSubService;
pub use streams::StreamService;

pub fn register_all(d: &Dispatcher) {
    d.register(Arc::new(PubSubService));
    d.register(Arc::new(StreamService));
    d.register(Arc::new(PeerService));
    d.register(Arc::new(NodeService));
}
