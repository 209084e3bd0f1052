pub mod proxy;
pub mod response;

pub use proxy::*;
pub use response::*;
