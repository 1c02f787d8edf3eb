#[doc(hidden)]
pub mod cast;
mod unaligned;

pub use cast::{as_slice, cast, Cast};
pub use macros::Cast;
pub use unaligned::Unaligned;
