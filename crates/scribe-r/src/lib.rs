pub mod backend;
pub mod server;

pub use backend::RemoteHost;
