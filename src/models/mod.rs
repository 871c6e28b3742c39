pub mod asset;
pub mod collection;
pub mod responses;

pub use asset::*;
pub use collection::*;
pub use responses::*;
