//! Device state: the full descriptor, sparse updates, and the applicator
//! that turns one into device calls against the other.

mod apply;
pub mod defaults;
mod descriptor;
mod update;

pub(crate) use apply::apply_update;
pub use descriptor::{
    BlendEquation, BlendFunc, Capability, RasterState, StateChange, StateDescriptor, StencilFunc,
    StencilOps, TextureBinding, UniformBufferBinding,
};
pub use update::{
    BlendEquationUpdate, BlendFuncUpdate, StateUpdate, StencilFuncUpdate, StencilOpUpdate,
};
