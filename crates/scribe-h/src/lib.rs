pub mod backend;
pub mod cdp;

pub use backend::HeadlessHost;
