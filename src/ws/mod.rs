pub mod protocol;
pub mod websocket_server;
