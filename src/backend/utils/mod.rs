pub mod crypto;
pub mod guards;
pub mod log;
pub mod rng;
pub mod time;
