pub mod assembler;
pub mod delegates;
pub mod fuel;
pub mod producer;
pub mod verifier;

pub use assembler::*;
pub use delegates::*;
pub use fuel::*;
pub use producer::*;
pub use verifier::*;
