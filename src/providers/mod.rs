//! Dependency injection providers.
//!
//! The coordinator receives providers instead of ready-made components, so
//! nothing touches the hardware before it decides to.

pub mod gateway;
pub mod traits;

pub use gateway::{GatewayProvider, NvidiaGatewayProvider};
pub use traits::AsyncProvider;
