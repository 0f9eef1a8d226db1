pub mod chart_flow;

pub use chart_flow::ChartFlow;
