//! CLI commands implementation

pub mod import;
pub mod init;
pub mod query;
pub mod records;
pub mod reset;
pub mod status;

pub use import::*;
pub use init::*;
pub use query::*;
pub use records::*;
pub use reset::*;
pub use status::*;
