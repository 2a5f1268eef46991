pub mod session;

pub use session::{OptionalSessionUser, SessionUser};
