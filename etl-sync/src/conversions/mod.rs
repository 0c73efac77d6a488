//! Parsing and rendering of spreadsheet values and their coercion into destination types.

mod coercion;
mod text;

pub use coercion::*;
pub use text::*;
