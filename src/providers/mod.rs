//! Dependency injection providers for service management.
//!
//! The coordinator builds the shared [`AppState`](crate::app_context::AppState)
//! through [`AppStateProvider`] and starts every service below through the
//! [`TaskManager`](crate::task_manager::TaskManager).

pub mod app_state;
pub mod bus_dispatch;
pub mod daisy_chain;
pub mod remote;
pub mod status_poll;
pub mod traits;

pub use app_state::AppStateProvider;
pub use bus_dispatch::BusDispatchServiceProvider;
pub use daisy_chain::DaisyChainServiceProvider;
pub use remote::RemoteControlServiceProvider;
pub use status_poll::StatusPollServiceProvider;
pub use traits::{AsyncProvider, ServiceProvider};
