pub mod token;

pub use token::{AccessToken, TokenProvider, EXPIRY_BUFFER_SECS};
