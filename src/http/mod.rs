pub mod client;
pub mod types;

pub use client::{HttpClient, HttpSession, SessionConfig};
pub use types::{HttpRequest, HttpResponse, Method, TransportError, TransportResult};
