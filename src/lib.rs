//! Maps researchers and laboratories onto the OECD research-field taxonomy
//! and summarizes their competencies with a text-generation service.

pub mod assembler;
pub mod candidates;
pub mod classifier;
pub mod config;
pub mod dispatch;
pub mod documents;
pub mod error;
pub mod logging;
pub mod oracle;
pub mod prompts;
pub mod resolver;
pub mod retry;
pub mod scholar;
pub mod session;
pub mod spreadsheet;
pub mod taxonomy;
pub mod telegram;

pub use dispatch::{run_job, InputSource, Job, ProcessingMode, Services};
pub use error::{Error, Result};
