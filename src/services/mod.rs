pub mod catalog;
pub mod converter;
pub mod merge;
pub mod resolver;
pub mod retry;
pub mod rules;
pub mod validator;
pub mod worker;

pub use catalog::*;
pub use converter::*;
pub use merge::*;
pub use resolver::*;
pub use retry::*;
pub use rules::*;
pub use validator::*;
pub use worker::*;
