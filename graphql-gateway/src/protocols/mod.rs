pub mod connection;
pub mod websocket;
