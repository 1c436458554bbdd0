pub mod channel;
pub mod session;
