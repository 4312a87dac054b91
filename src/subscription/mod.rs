// Change subscriptions: in-process listeners and the WebSocket change feed

pub mod manager;
pub mod protocol;
pub mod registry;

pub use manager::ConnectionManager;
pub use protocol::{ChangeMessage, ClientMessage, StatusMessage};
pub use registry::{KindFilter, Listener, ListenerRegistry, Subscription};
