pub mod kind;
pub mod reference;

pub use kind::MediaKind;
pub use reference::{MediaReferenceBuilder, TransformSet};
