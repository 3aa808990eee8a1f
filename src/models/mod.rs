pub mod field;
pub mod request;
pub mod response;
pub mod value;

pub use field::*;
pub use request::*;
pub use response::*;
pub use value::Val;
