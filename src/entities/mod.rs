// Entity Models
//
// The category registry is the only user-editable entity; sessions and
// transactions live in `models`.

pub mod category;

pub use category::{CategoryRegistry, DEFAULT_CATEGORIES};
