//! HTTP gateway to the session backend.

pub mod client;
pub mod envelope;

pub use client::{ApiResponse, GatewayRequest, HttpGateway, HttpGatewayBuilder, ResponseBody};
pub use envelope::ErrorEnvelope;
