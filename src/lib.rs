//! # ffu_controld
//!
//! A Linux daemon supervising fan filter units (FFUs) on shared field buses.
//!
//! ## Features
//!
//! - **Device registry**: persistent FFU records with typed properties
//! - **Transaction correlation**: bus responses are routed back to the
//!   device that issued the request
//! - **Remote control**: a line based TCP protocol for listing and adding FFUs
//! - **Daisy chain addressing**: digital I/O handshake used while assigning
//!   bus addresses
//!
//! ## Architecture
//!
//! The daemon uses a provider-based dependency injection system with:
//! - [`SystemCoordinator`](coordinator::SystemCoordinator) - Main lifecycle manager
//! - [`EventBus`](event::EventBus) - Inter-service communication
//! - [`AppState`](app_context::AppState) - Shared application state
//! - Service providers for modular functionality
//!
//! ## Example
//!
//! ```no_run
//! use ffu_controld::{application::Application, config::ConfigManager};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config_manager = ConfigManager::load(None).await?;
//!     Application::builder()
//!         .with_config_manager(config_manager)
//!         .build()
//!         .await?
//!         .run()
//!         .await
//! }
//! ```

pub mod app_context;
pub mod application;
pub mod bus;
pub mod config;
pub mod coordinator;
pub mod daisy_chain;
pub mod device;
pub mod error;
pub mod event;
pub mod protocol;
pub mod providers;
pub mod registry;
pub mod task_manager;
