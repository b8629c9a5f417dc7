//! Columnar value model: pages, blocks, vectors and their builders.

mod block;
mod builder;
mod dictionary;
mod element;
mod page;
mod values;

pub use block::{Block, Vector};
pub(crate) use block::type_mismatch;
pub use builder::{
    AnyBlockBuilder, BytesBlockBuilder, DocBlockBuilder, NullBlockBuilder, OrdinalsBlockBuilder, Primitive,
    PrimitiveBlockBuilder,
};
pub use dictionary::Dictionary;
pub use element::{DocRef, ElementType, Scalar};
pub use page::Page;
pub use values::{BytesRefs, BytesValues, DocColumn, OrdinalValues, PrimitiveValues, Values};
