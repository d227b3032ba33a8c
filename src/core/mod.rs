pub mod hash;
pub mod identity;
pub mod incoming_request_handler;
pub mod node;
pub mod status;
