mod adaptive;
mod table;

pub use self::{adaptive::*, table::*};
