//! Host Object Bridge (C9, spec.md §4.9): strictly-typed facade objects registered
//! into the Rhai engine as distinct tagged types, not duck-typed maps.

pub mod builder;
pub mod cookie;
pub mod header;
pub mod request;
pub mod response;
pub mod scope;
pub mod url;

pub use builder::RequestBuilder;
pub use cookie::Cookie;
pub use header::Header;
pub use request::Request;
pub use response::Response;
pub use scope::ScopeHandle;
pub use url::Url;
