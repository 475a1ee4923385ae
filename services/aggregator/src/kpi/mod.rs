pub mod compute;
pub mod handler;
pub mod writer;
