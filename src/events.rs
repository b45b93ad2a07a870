//! Methods spoken by the embedded checkout surface.
//!
//! Cart and checkout payloads are carried as raw JSON; only the parts a
//! response must be validated against are typed.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::cache::{SurfaceCache, SurfaceFactory};
use crate::protocol::{MethodRegistry, Notification, RegistryBuilder, Request, ResponsePayload};

/// Method names.
pub struct Methods;

impl Methods {
    pub const START: &'static str = "checkout.start";
    pub const COMPLETE: &'static str = "checkout.complete";
    pub const ERROR: &'static str = "checkout.error";
    pub const ADDRESS_CHANGE_START: &'static str = "checkout.addressChangeStart";
    pub const PAYMENT_METHOD_CHANGE_START: &'static str = "checkout.paymentMethodChangeStart";
    pub const SUBMIT_START: &'static str = "checkout.submitStart";
}

// Notification params

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StartParams {
    pub cart: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CompleteParams {
    pub order_confirmation: Value,
    pub cart: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ErrorParams {
    pub code: Option<String>,
    pub message: Option<String>,
    pub recoverable: bool,
}

// Request params

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressChangeStartParams {
    /// "shipping" or "billing".
    pub address_type: String,
    pub cart: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentMethodChangeStartParams {
    pub cart: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitStartParams {
    pub cart: Value,
    pub checkout: Value,
}

// Responses

/// Application-level error returned to the surface inside a result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseError {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_target: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryAddressInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country_code: Option<String>,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectableAddressInput {
    pub address: DeliveryAddressInput,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub addresses: Option<Vec<SelectableAddressInput>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery: Option<DeliveryInput>,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressChangeStartResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cart: Option<CartInput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<ResponseError>>,
}

impl AddressChangeStartResponse {
    pub fn with_addresses(addresses: Vec<SelectableAddressInput>) -> Self {
        Self {
            cart: Some(CartInput {
                delivery: Some(DeliveryInput {
                    addresses: Some(addresses),
                }),
                rest: Map::new(),
            }),
            errors: None,
        }
    }
}

impl ResponsePayload for AddressChangeStartResponse {
    /// A supplied cart must carry at least one delivery address, each with a
    /// two-letter country code.
    fn validate(&self) -> Result<(), String> {
        let Some(cart) = &self.cart else {
            return Ok(());
        };
        let addresses = cart
            .delivery
            .as_ref()
            .and_then(|d| d.addresses.as_deref())
            .unwrap_or_default();
        if addresses.is_empty() {
            return Err("At least one address is required in cart.delivery.addresses".to_string());
        }
        for (index, selectable) in addresses.iter().enumerate() {
            match selectable.address.country_code.as_deref() {
                None | Some("") => return Err(format!("Country code is required at index {}", index)),
                Some(code) if code.chars().count() != 2 => {
                    return Err(format!(
                        "Country code must be exactly 2 characters (ISO 3166-1 alpha-2) at index {}, got: '{}'",
                        index, code
                    ));
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentMethodChangeStartResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cart: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<ResponseError>>,
}

impl ResponsePayload for PaymentMethodChangeStartResponse {}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitStartResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cart: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<ResponseError>>,
}

impl ResponsePayload for SubmitStartResponse {}

/// Every message the checkout surface can send.
#[derive(Debug)]
pub enum CheckoutMessage {
    Start(Notification<StartParams>),
    Complete(Notification<CompleteParams>),
    Error(Notification<ErrorParams>),
    AddressChangeStart(Request<AddressChangeStartParams, AddressChangeStartResponse>),
    PaymentMethodChangeStart(Request<PaymentMethodChangeStartParams, PaymentMethodChangeStartResponse>),
    SubmitStart(Request<SubmitStartParams, SubmitStartResponse>),
}

impl CheckoutMessage {
    pub fn method(&self) -> &str {
        match self {
            CheckoutMessage::Start(n) => n.method(),
            CheckoutMessage::Complete(n) => n.method(),
            CheckoutMessage::Error(n) => n.method(),
            CheckoutMessage::AddressChangeStart(r) => r.method(),
            CheckoutMessage::PaymentMethodChangeStart(r) => r.method(),
            CheckoutMessage::SubmitStart(r) => r.method(),
        }
    }

    pub fn is_request(&self) -> bool {
        matches!(
            self,
            CheckoutMessage::AddressChangeStart(_)
                | CheckoutMessage::PaymentMethodChangeStart(_)
                | CheckoutMessage::SubmitStart(_)
        )
    }

    /// Cancel the message if it is a request.
    pub fn cancel(&self) {
        match self {
            CheckoutMessage::AddressChangeStart(r) => r.cancel(),
            CheckoutMessage::PaymentMethodChangeStart(r) => r.cancel(),
            CheckoutMessage::SubmitStart(r) => r.cancel(),
            _ => {}
        }
    }

    /// A finished checkout must not be shown again, and a failed one must
    /// not be reused at all.
    pub fn apply_to_cache<F: SurfaceFactory>(&self, cache: &SurfaceCache<F>) {
        match self {
            CheckoutMessage::Complete(_) => {
                log::debug!("Checkout complete, invalidating cached surface");
                cache.invalidate();
            }
            CheckoutMessage::Error(_) => {
                log::debug!("Checkout failed, clearing cached surface");
                cache.clear();
            }
            _ => {}
        }
    }
}

/// Registry for all checkout methods.
pub fn checkout_registry() -> MethodRegistry<CheckoutMessage> {
    RegistryBuilder::new()
        .register_notification(Methods::START, CheckoutMessage::Start)
        .register_notification(Methods::COMPLETE, CheckoutMessage::Complete)
        .register_notification(Methods::ERROR, CheckoutMessage::Error)
        .register_request(Methods::ADDRESS_CHANGE_START, CheckoutMessage::AddressChangeStart)
        .register_request(Methods::PAYMENT_METHOD_CHANGE_START, CheckoutMessage::PaymentMethodChangeStart)
        .register_request(Methods::SUBMIT_START, CheckoutMessage::SubmitStart)
        .build()
}
