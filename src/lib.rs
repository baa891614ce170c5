pub mod error;
pub mod protocol;
pub mod value;
pub mod bind;
pub mod results;
pub mod lob;
pub mod table;
pub mod session;
pub mod exec;
pub mod modify;
pub mod testkit;
