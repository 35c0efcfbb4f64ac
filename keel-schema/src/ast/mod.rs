//! Declarative schema definitions.
//!
//! These are the types an application uses to describe the schema it
//! expects. They are compiled into a [`SchemaSnapshot`](crate::SchemaSnapshot)
//! by the [`LocalCompiler`](crate::LocalCompiler).

mod column;
mod namespace;
mod table;

pub use column::*;
pub use namespace::*;
pub use table::*;
