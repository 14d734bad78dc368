pub mod models;
pub mod outcome;
pub mod retcode;
pub mod traits;

pub use models::*;
pub use outcome::*;
pub use traits::*;
