pub mod codec;
pub mod policy;
pub mod protocol;
