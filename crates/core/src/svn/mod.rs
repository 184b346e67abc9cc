//! `svn` command-line client used by the svn upstream and host adapters.

pub mod client;
pub mod parser;

pub use client::SvnClient;
pub use parser::{SvnInfo, SvnStatusEntry};
