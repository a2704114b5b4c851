pub mod traits;
pub mod detector;

pub use traits::Analyzer;
pub use detector::PonziDetector;
