//! Caller identity and authorization.
//! Keep the public surface thin and split implementation across sub-modules.

mod access;
mod gate;
mod request_context;
mod resolver;
mod token;

pub use access::{ControllerAccess, ModelAccess};
pub use gate::{api_key_matches, AuthenticationGate};
pub use request_context::RequestContext;
pub use resolver::{AuthorizationResolver, Authorized};
pub use token::{Credentials, IdentityToken};
