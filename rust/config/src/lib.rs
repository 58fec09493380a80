//! Configuration types for the stylegan2 training launcher.

mod args;
mod overlay;
mod storage;
mod train;
mod types;

pub use args::*;
pub use overlay::*;
pub use storage::*;
pub use train::*;
pub use types::*;
