//! x402 payment flow
//!
//! 1. Send the request as-is
//! 2. On 402, parse the challenge (JSON body, else `PAYMENT-REQUIRED` header)
//! 3. Pick a requirement the treasurer supports and have it authorized
//! 4. Retry once with the `X-PAYMENT` header

pub mod networks;
pub mod requirement;
mod transport;


pub use requirement::PaymentRequirement;
pub use transport::{HttpSend, PaymentTransport, ReqwestSender, RequirementSelector};
