pub mod circuit_breaker;
pub mod existence_service;
pub mod http_api;
pub mod message_dispatcher;
pub mod messages;
pub mod peer_client;
pub mod request_map;
