//! Core trait defining the verification and settlement interface.
//!
//! Implementors validate incoming payment payloads against merchant
//! requirements ([`Facilitator::verify`]) and drive on-chain settlement
//! ([`Facilitator::settle`]).

use async_trait::async_trait;
use std::fmt::{Debug, Display};
use std::sync::Arc;

use crate::types::{SettleRequest, SettleResponse, SupportedResponse, VerifyRequest, VerifyResponse};

/// Asynchronous interface for payment facilitators.
#[async_trait]
pub trait Facilitator {
    /// The error type returned by this facilitator.
    type Error: Debug + Display;

    /// Verifies a proposed payment payload against the stated requirements.
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] if any validation step fails; the error's
    /// display form is the user-visible invalid reason.
    async fn verify(&self, request: &VerifyRequest) -> Result<VerifyResponse, Self::Error>;

    /// Executes (or confirms) an on-chain settlement for a valid request.
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] if verification, submission, confirmation, or
    /// the final on-chain re-match fails.
    async fn settle(&self, request: &SettleRequest) -> Result<SettleResponse, Self::Error>;

    /// Lists supported networks and schemes. Pure and deterministic.
    fn supported(&self) -> SupportedResponse;
}

#[async_trait]
impl<T: Facilitator + Send + Sync> Facilitator for Arc<T> {
    type Error = T::Error;

    async fn verify(&self, request: &VerifyRequest) -> Result<VerifyResponse, Self::Error> {
        self.as_ref().verify(request).await
    }

    async fn settle(&self, request: &SettleRequest) -> Result<SettleResponse, Self::Error> {
        self.as_ref().settle(request).await
    }

    fn supported(&self) -> SupportedResponse {
        self.as_ref().supported()
    }
}
