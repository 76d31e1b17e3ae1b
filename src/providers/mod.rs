pub mod frankfurter;
pub mod polygon;
pub mod util;

pub use frankfurter::FrankfurterProvider;
pub use polygon::PolygonProvider;
