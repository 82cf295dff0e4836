pub mod handler;
pub mod hub;

pub use handler::ws_router;
pub use hub::ClipboardHub;
