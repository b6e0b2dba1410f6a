pub mod presence_routes;
mod presence_websocket;

pub use presence_websocket::SocketSettings;
