//! Push-stream transport for logtail
//!
//! This crate opens the long-lived log stream and splits it into JSON
//! payload frames. The [`LogTransport`] trait is the seam the stream
//! controller is written against; [`HttpTransport`] is the production
//! implementation.

mod error;
mod frame;
mod transport;

pub use error::{ClientError, Result};
pub use frame::{MAX_FRAME_LEN, frame_payload};
pub use transport::{EventStream, HttpTransport, LogTransport};

// Re-export types used in our public API
pub use logtail_types::{StreamFilters, StreamRequest};
