mod attribute;
mod parser;
mod tags;

pub use attribute::*;
pub use parser::*;
pub use tags::*;
