//! Factory and client stubs tying the engine together.

mod builder;
mod client;
mod factory;
mod outcome;

pub use builder::{AuthLayerFn, GroupCustomization, ProxyFactoryBuilder};
pub use client::ClientProxy;
pub use factory::ProxyFactory;
pub use outcome::Outcome;
