//! Leaf transforms. Every function here is a task action: it reads its inputs
//! from the source tree or the temp directory and writes files, nothing is
//! passed between tasks in memory.

pub mod assets;
pub mod css;
pub mod html;
pub mod js;

pub use css::StyleError;
pub use html::TemplateError;
pub use js::ScriptError;
