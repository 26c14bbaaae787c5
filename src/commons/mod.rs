//! Types shared by the library and the command line tool.
pub mod error;
pub mod util;
