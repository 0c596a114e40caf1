pub mod byte_tracker;
pub mod error;
pub mod flow_tracker;
pub mod hybrid_tracker;
pub mod lapjv;
pub mod object;

pub use byte_tracker::rect;
pub use byte_tracker::strack;

pub use byte_tracker::ByteTracker;
pub use error::TrackError;
pub use flow_tracker::FlowTracker;
pub use hybrid_tracker::HybridTracker;
pub use object::Object;
pub use rect::Rect;
