pub mod assembler;
pub mod backend;
pub mod capture;
pub mod config;
pub mod dom;
pub mod host;
pub mod locator;
pub mod navigation;
pub mod recorder;
pub mod screenshot;
pub mod selector;
pub mod state;
pub mod store;

pub use scribe_common::formatter;
pub use scribe_common::protocol;

pub use recorder::{Recorder, RecorderError};
