//! Domain records shared by the repository, service and HTTP layers.

pub mod audit;
pub mod catalog;
pub mod macros;
pub mod repair;
pub mod token;
pub mod user;

pub use audit::*;
pub use catalog::*;
pub use repair::*;
pub use token::*;
pub use user::*;
