//! Builders for constructing engines from configuration.

pub mod engine_builder;

pub use engine_builder::{
    build_engine, build_engine_with, relay_factory, BuildContext, BuildOptions, ModuleFactory,
    ModuleFactoryRegistry, DNS_ALIAS,
};
