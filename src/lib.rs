#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod cli;
pub mod encoder;
pub mod files;
pub mod process;
pub mod settings;
pub mod sink;
pub mod util;

mod error;
pub use error::{Error, Result};
