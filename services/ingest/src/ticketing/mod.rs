pub mod client;
pub mod comments;
pub mod models;
pub mod sync;
