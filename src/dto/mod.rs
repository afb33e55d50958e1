pub mod health;
pub mod phase;
pub mod projection;
pub mod room;
pub mod validation;
