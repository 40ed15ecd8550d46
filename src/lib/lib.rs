#![warn(missing_docs)]

//! Material shader build-and-cache pipeline. Turns a material node graph and a template shader
//! into compiled SPIR-V artifacts through an external shading-language compiler, skipping work
//! that content-addressed cache records prove to be up to date.

pub mod cache;
pub mod config;
pub mod material;
pub mod orchestrator;
pub mod shader;
pub mod template;
pub mod toolchain;

macro_rules! states {
    {$($(#[$attr:meta])* $state:ident),+ $(,)?} => {
        $(
            #[derive(Clone, Debug, Default, PartialEq)]
            $(#[$attr])*
            pub struct $state;
        )+
    };
}

states! {
    /// Graph is being edited; nodes can be added and connected.
    Unvalidated,
    /// Graph was checked for cycles and can be evaluated.
    Validated,
}

/// Commonly used types.
pub mod prelude {
    pub use crate::{
        cache::{MaterialCache, ShaderCache},
        config::BuildConfig,
        material::{CompileFlag, Material, MaterialInput, MaterialSource},
        orchestrator::BuildOrchestrator,
        shader::{
            channel::MaterialChannel,
            graph::{ArithmeticOp, NodeGraph, NodeKind, NodeRef, PinRef},
            value::{ParamValue, ValueType},
        },
        template::GeneratedSource,
        toolchain::{Invocation, ProcessToolchain, Toolchain, ToolchainInvoker},
        Unvalidated, Validated,
    };
}
