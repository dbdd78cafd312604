pub mod auth;
pub mod body_limit;
pub mod capture;
pub mod csrf;
pub mod favicon;
pub mod language;
pub mod request_id;
pub mod security_headers;
pub mod server_timing;

pub use auth::AuthenticatedUser;
pub use body_limit::BodySizeLimit;
pub use capture::{Capture, CaptureState};
pub use csrf::Csrf;
pub use favicon::Favicon;
pub use language::{LanguageDetect, Locale};
pub use request_id::{RequestId, RequestIdMiddlewareFactory};
pub use security_headers::SecurityHeaders;
pub use server_timing::ServerTiming;
