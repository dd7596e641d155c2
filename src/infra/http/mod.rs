pub mod etag;
mod middleware;
mod public;

pub use middleware::{REQUEST_ID_HEADER, RequestContext, request_timeout};
pub use public::{HttpState, build_router};
