mod sequence_checker;
mod sequence_number_unwrapper;

pub use sequence_checker::*;
pub use sequence_number_unwrapper::*;
