//! The remote data gateway as seen by the client: table reads and writes,
//! row-level change feeds and serverless function calls.

pub mod dispatcher;
pub mod error;
pub mod functions;
pub mod gateway;
pub mod local;

pub use dispatcher::{ChangeStream, Dispatcher, Notification};
pub use error::GatewayError;
pub use functions::{FunctionInvoker, FunctionRegistry, HttpFunctions};
pub use gateway::{Gateway, GatewayResultExt};
pub use local::LocalGateway;
