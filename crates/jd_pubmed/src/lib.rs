pub mod client;
pub mod dates;
pub mod parse;

pub use client::PubMedClient;
