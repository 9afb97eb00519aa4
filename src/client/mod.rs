//! Chat client: a reqwest transport plus the reducer that turns the event
//! stream back into messages.

pub mod reassembler;
pub mod transport;

pub use reassembler::{ChatStatus, Reassembler};
pub use transport::ChatClient;
