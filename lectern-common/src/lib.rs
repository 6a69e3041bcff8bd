pub mod model;
pub mod slug;
pub mod util;
pub mod validation;
