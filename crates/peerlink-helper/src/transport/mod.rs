pub mod channel;
pub mod codec;

pub use channel::serve;
pub use codec::{read_frame, write_frame};
