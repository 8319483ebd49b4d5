pub mod dispatcher;

pub use dispatcher::{reply, Dispatcher, RpcService};
