//! Real-time core: connection registry, wire codec, dispatcher, broadcast
//! fan-out and the per-connection actor.

pub mod actor;
pub mod broadcast;
pub mod dispatch;
pub mod handler;
pub mod lifecycle;
pub mod protocol;
pub mod registry;

pub use dispatch::{CommandHandler, Dispatcher, HandlerRegistry, LifecycleHandler, QueryHandler};
pub use protocol::{Broadcast, Command, CommandAction, Event, Query, ServerEvent};
pub use registry::{ConnectionRegistry, ConnectionSender, Session};
