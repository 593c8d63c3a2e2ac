pub mod code;
pub mod req;
