//! Typed handlers.
//!
//! A [`TypedHandler`] receives its validated parameters as a `serde` record
//! instead of the [`Parameters`] bag and returns a serializable value. The
//! record's fields are the camel-cased parameter names; a JSON body is
//! available under `body`.
//!
//! ```rust,ignore
//! #[derive(Deserialize)]
//! struct GetPet { pet_id: i64 }
//!
//! struct GetPetHandler;
//! impl TypedHandler for GetPetHandler {
//!     type Request = GetPet;
//!     type Response = Pet;
//!     fn handle(&self, req: TypedRequest<GetPet>) -> Result<TypedResponse<Pet>, HttpError> {
//!         Ok(TypedResponse::ok(find_pet(req.data.pet_id)?))
//!     }
//! }
//!
//! handlers.register_typed("getPet", GetPetHandler);
//! ```

use crate::errors::{ErrorCode, HttpError};
use crate::handler::{Handler, HandlerRegistry, HandlerResult, Response};
use crate::parameters::Parameters;
use crate::spec::Operation;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Validated input of a typed handler.
#[derive(Debug, Clone)]
pub struct TypedRequest<T> {
    pub operation_id: String,
    pub data: T,
}

/// Output of a typed handler, sent as a JSON-like value.
#[derive(Debug, Clone, Serialize)]
pub struct TypedResponse<T: Serialize> {
    pub status: u16,
    pub body: T,
}

impl<T: Serialize> TypedResponse<T> {
    pub fn new(status: u16, body: T) -> Self {
        Self { status, body }
    }

    pub fn ok(body: T) -> Self {
        Self::new(200, body)
    }
}

pub trait TypedHandler: Send + Sync + 'static {
    type Request: DeserializeOwned + Send + 'static;
    type Response: Serialize + Send + 'static;

    /// # Errors
    ///
    /// Business errors, encoded with their own status and code.
    fn handle(
        &self,
        req: TypedRequest<Self::Request>,
    ) -> Result<TypedResponse<Self::Response>, HttpError>;
}

/// Adapts a [`TypedHandler`] to the untyped [`Handler`] contract.
#[derive(Debug, Clone)]
pub struct Typed<H>(pub H);

impl<H: TypedHandler> Handler for Typed<H> {
    fn handle(&self, parameters: Parameters, operation: &Operation) -> HandlerResult {
        let data = parameters.deserialize::<H::Request>()?;
        let TypedResponse { status, body } = self.0.handle(TypedRequest {
            operation_id: operation.operation_id.clone(),
            data,
        })?;
        let body = serde_json::to_value(body).map_err(|e| {
            HttpError::new(
                ErrorCode::Unexpected,
                format!("serializing the `{}` response failed: {e}", operation.operation_id),
            )
        })?;
        Ok(Response::json(status, body))
    }
}

impl HandlerRegistry {
    /// Register a typed handler for `operation_id`.
    pub fn register_typed<H: TypedHandler>(
        &mut self,
        operation_id: impl Into<String>,
        handler: H,
    ) -> &mut Self {
        self.register(operation_id, Typed(handler))
    }
}
