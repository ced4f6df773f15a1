pub mod ack;
pub mod connection;
pub mod error;
pub mod hub;
pub mod keyed;
pub mod notify;
pub mod pipeline;
pub mod presence;
pub mod receipts;

pub use error::SendError;
pub use hub::Hub;
pub use pipeline::ChatService;

#[cfg(test)]
mod testing;
