pub mod gemini;

// Re-export commonly used services
pub use gemini::{ChartModel, GeminiClient, KeyRing};
