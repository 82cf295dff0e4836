pub mod audit;
pub mod clipboard;
pub mod device;
pub mod user;
