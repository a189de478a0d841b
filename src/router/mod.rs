//! # Router Module
//!
//! Two halves:
//!
//! - [`OperationResolver`] compiles the path templates of the API document
//!   into regexes at startup and maps `(method, path)` to an operation.
//! - [`Router`] runs one request through negotiation, parameter and body
//!   validation, the handler and response encoding.
//!
//! ```rust,ignore
//! use gatehouse::router::{Resolution, Router};
//!
//! let router = Router::new(&document, &handlers, &config)?;
//! if let Resolution::Found { operation, path_params } =
//!     router.resolver().resolve(&http::Method::GET, "/pets/12")
//! {
//!     println!("{} {:?}", operation.operation_id, path_params);
//! }
//! ```

mod core;
mod resolver;

pub use core::Router;
pub use resolver::{OperationResolver, ParamVec, Resolution, DUPLICATE_ROUTE, MAX_INLINE_PARAMS};
