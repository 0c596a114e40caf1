mod features;
mod flow_tracker;
pub mod gray;
mod lk;

pub use flow_tracker::FlowTracker;
pub use gray::Point;
