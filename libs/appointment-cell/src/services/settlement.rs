// libs/appointment-cell/src/services/settlement.rs
//! Payment confirmation, webhooks, retries and refunds.
//!
//! Client confirmation, webhooks and explicit verification all funnel into
//! [`AppointmentBookingService::settle`], which re-verifies with the provider
//! before touching any row. Replays are harmless: a payment that has left
//! PENDING is reported, never transitioned again.

use chrono::Duration;
use serde_json::{json, Value};
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use payment_cell::{
    Payment, PaymentProvider, PaymentStatus, ProviderTransactionStatus, VerifiedTransaction, WebhookEvent,
};

use crate::models::{
    Actor, Appointment, AppointmentError, AppointmentStatus, BookingResponse, ConfirmAppointmentRequest,
    PaymentConfirmation, RefundRequest, RefundStatus, RetryPaymentRequest, Settlement, SettlementOutcome,
    WebhookAck,
};
use crate::services::booking::{commit_before, initialize_payment, new_payment, AppointmentBookingService};
use crate::services::notification::NotificationKind;

impl AppointmentBookingService {
    /// Client-side confirmation after checkout. The request must describe the
    /// payment exactly as it was booked; the provider is still asked.
    #[instrument(skip(self, request), fields(actor_id = %actor.id, reference = %request.provider_reference))]
    pub async fn confirm_appointment(
        &self,
        actor: &Actor,
        request: ConfirmAppointmentRequest,
    ) -> Result<PaymentConfirmation, AppointmentError> {
        let payment = self
            .store
            .get_payment_by_reference(&request.provider_reference)
            .await?
            .ok_or_else(|| AppointmentError::NotFound("Payment".to_string()))?;
        if payment.appointment_id != request.appointment_id {
            return Err(AppointmentError::Validation(
                "provider_reference does not belong to this appointment".to_string(),
            ));
        }

        let appointment = self.load_appointment(request.appointment_id).await?;
        self.authorize_participant(actor, &appointment).await?;

        if payment.provider != request.payment_provider {
            return Err(AppointmentError::Validation(format!(
                "payment was made through {}",
                payment.provider.as_str()
            )));
        }
        if !payment.matches_amount(request.amount, &request.currency) {
            return Err(AppointmentError::Validation(
                "amount or currency does not match the booked payment".to_string(),
            ));
        }
        if payment.payment_method != request.payment_method {
            debug!(
                "Client reported {} for a {} payment",
                request.payment_method.as_str(),
                payment.payment_method.as_str()
            );
        }

        let settlement = self.settle_with_deadline(&request.provider_reference).await?;
        match settlement.outcome {
            SettlementOutcome::Confirmed | SettlementOutcome::AlreadyConfirmed => Ok(PaymentConfirmation {
                appointment: settlement.appointment,
                payment: settlement.payment,
            }),
            SettlementOutcome::Failed(reason) => Err(AppointmentError::ProviderRejected(reason)),
            SettlementOutcome::Unsettled(status) => Err(AppointmentError::ProviderRejected(format!(
                "transaction is still {}",
                status
            ))),
            SettlementOutcome::Inactive(status) => Err(AppointmentError::IllegalPaymentState(format!(
                "payment is {}",
                status
            ))),
        }
    }

    /// Authenticated provider callback. Unknown references are acknowledged so
    /// the provider stops redelivering them.
    #[instrument(skip(self, raw_body, signature), fields(provider = provider.as_str()))]
    pub async fn handle_webhook(
        &self,
        provider: PaymentProvider,
        raw_body: &[u8],
        signature: Option<&str>,
    ) -> Result<WebhookAck, AppointmentError> {
        let gateway = self.gateways.get(provider)?;
        let signature = signature.ok_or(AppointmentError::SignatureMismatch)?;
        if !gateway.verify_webhook_signature(raw_body, signature) {
            warn!("Rejected webhook with invalid signature");
            return Err(AppointmentError::SignatureMismatch);
        }

        let event: WebhookEvent = serde_json::from_slice(raw_body)
            .map_err(|e| AppointmentError::Validation(format!("malformed webhook body: {}", e)))?;
        let reference = event.data.reference.clone();

        if !event.event.starts_with("charge.") {
            debug!("Ignoring {} webhook for {}", event.event, reference);
            return Ok(WebhookAck {
                event: event.event,
                reference,
                outcome: None,
            });
        }

        match self.store.get_payment_by_reference(&reference).await? {
            Some(payment) if payment.provider == provider => {}
            Some(_) => {
                warn!("Webhook provider does not match payment {}", reference);
                return Ok(WebhookAck {
                    event: event.event,
                    reference,
                    outcome: None,
                });
            }
            None => {
                warn!("Webhook for unknown payment reference {}", reference);
                return Ok(WebhookAck {
                    event: event.event,
                    reference,
                    outcome: None,
                });
            }
        }

        let settlement = self.settle_with_deadline(&reference).await?;
        info!("Webhook {} for {} settled as {:?}", event.event, reference, settlement.outcome);

        Ok(WebhookAck {
            event: event.event,
            reference,
            outcome: Some(settlement.outcome),
        })
    }

    /// Re-verifies a payment on demand and reports what happened.
    pub async fn verify_payment(&self, actor: &Actor, reference: &str) -> Result<Settlement, AppointmentError> {
        let payment = self
            .store
            .get_payment_by_reference(reference)
            .await?
            .ok_or_else(|| AppointmentError::NotFound("Payment".to_string()))?;
        let appointment = self.load_appointment(payment.appointment_id).await?;
        self.authorize_participant(actor, &appointment).await?;

        self.settle_with_deadline(reference).await
    }

    /// Replaces a FAILED or CANCELLED payment on a PENDING appointment with a
    /// fresh provider transaction.
    #[instrument(skip(self, request), fields(actor_id = %actor.id))]
    pub async fn retry_payment(
        &self,
        actor: &Actor,
        appointment_id: Uuid,
        request: RetryPaymentRequest,
    ) -> Result<BookingResponse, AppointmentError> {
        let appointment = self.load_appointment(appointment_id).await?;
        if appointment.patient_id != actor.id && !actor.is_admin() {
            return Err(AppointmentError::Forbidden(
                "Only the booking patient can retry payment".to_string(),
            ));
        }
        let patient = self
            .store
            .get_patient_contact(appointment.patient_id)
            .await?
            .ok_or_else(|| AppointmentError::NotFound("Patient".to_string()))?;

        let deadline = self.deadline();
        let booking = self
            .run_with_deadline(deadline, async {
                let now = self.clock.now();
                let mut tx = self.store.begin().await?;

                let mut appointment = tx
                    .lock_appointment(appointment_id)
                    .await?
                    .ok_or_else(|| AppointmentError::NotFound("Appointment".to_string()))?;
                if appointment.status != AppointmentStatus::Pending {
                    return Err(AppointmentError::IllegalPaymentState(format!(
                        "appointment is {}",
                        appointment.status
                    )));
                }

                let previous = match appointment.payment_id {
                    Some(payment_id) => tx.lock_payment(payment_id).await?,
                    None => None,
                }
                .ok_or_else(|| AppointmentError::NotFound("Payment".to_string()))?;
                if !matches!(previous.status, PaymentStatus::Failed | PaymentStatus::Cancelled) {
                    return Err(AppointmentError::IllegalPaymentState(format!(
                        "current payment is {}",
                        previous.status
                    )));
                }

                let provider = request.payment_provider.unwrap_or(previous.provider);
                let gateway = self.gateways.get(provider)?;

                let payment = new_payment(
                    &appointment,
                    previous.amount_minor,
                    &previous.currency,
                    previous.payment_method,
                    provider,
                    now,
                );
                tx.insert_payment(&payment).await?;
                let (payment, authorization_url, access_code) =
                    initialize_payment(tx.as_mut(), gateway.as_ref(), payment, &patient.email).await?;

                appointment.payment_id = Some(payment.id);
                appointment.updated_at = now;
                tx.update_appointment(&appointment).await?;
                commit_before(tx, deadline).await?;

                Ok(BookingResponse {
                    appointment,
                    payment,
                    authorization_url,
                    access_code,
                })
            })
            .await?;

        info!(
            "Payment for appointment {} retried as {}",
            booking.appointment.id, booking.payment.provider_reference
        );
        Ok(booking)
    }

    // ==============================================================================
    // SETTLEMENT
    // ==============================================================================

    async fn settle_with_deadline(&self, reference: &str) -> Result<Settlement, AppointmentError> {
        let deadline = self.deadline();
        let settlement = self
            .run_with_deadline(deadline, self.settle(reference, deadline))
            .await?;

        if settlement.outcome == SettlementOutcome::Confirmed {
            self.notify(NotificationKind::PaymentConfirmed, &settlement.appointment, Some(&settlement.payment))
                .await;
        }
        Ok(settlement)
    }

    /// Verify-then-transition. The provider call happens outside any store
    /// transaction; the rows are re-read under lock afterwards so concurrent
    /// settlements of one reference apply at most once.
    async fn settle(&self, reference: &str, deadline: Instant) -> Result<Settlement, AppointmentError> {
        let payment = self
            .store
            .get_payment_by_reference(reference)
            .await?
            .ok_or_else(|| AppointmentError::NotFound("Payment".to_string()))?;

        if let Some(outcome) = settled_outcome(&payment) {
            let appointment = self.load_appointment(payment.appointment_id).await?;
            return Ok(Settlement {
                appointment,
                payment,
                outcome,
            });
        }

        let gateway = self.gateways.get(payment.provider)?;
        let verified = gateway.verify(reference).await.map_err(|e| {
            warn!("Verification of {} failed: {}", reference, e);
            AppointmentError::from(e)
        })?;

        let now = self.clock.now();
        // Appointment before payment, the order every other writer uses. A
        // reschedule may repoint the payment between the two reads; follow it.
        let mut appointment_id = payment.appointment_id;
        let (mut tx, mut appointment, mut payment) = loop {
            let mut tx = self.store.begin().await?;
            let appointment = tx
                .lock_appointment(appointment_id)
                .await?
                .ok_or_else(|| AppointmentError::NotFound("Appointment".to_string()))?;
            let payment = tx
                .lock_payment_by_reference(reference)
                .await?
                .ok_or_else(|| AppointmentError::NotFound("Payment".to_string()))?;
            if payment.appointment_id == appointment.id {
                break (tx, appointment, payment);
            }
            tx.rollback().await?;
            debug!("Payment {} moved to appointment {}", reference, payment.appointment_id);
            appointment_id = payment.appointment_id;
        };

        if let Some(outcome) = settled_outcome(&payment) {
            tx.rollback().await?;
            return Ok(Settlement {
                appointment,
                payment,
                outcome,
            });
        }

        let outcome = match &verified.status {
            ProviderTransactionStatus::Success if verified_matches(&payment, &verified, reference) => {
                payment.transition(PaymentStatus::Success, now)?;
                merge_metadata(&mut payment.metadata, "verification", verification_record(&verified));

                if appointment.status == AppointmentStatus::Pending {
                    appointment.transition(AppointmentStatus::Confirmed, now)?;
                    tx.update_appointment(&appointment).await?;
                } else {
                    warn!(
                        "Payment {} settled for appointment {} in status {}",
                        reference, appointment.id, appointment.status
                    );
                }
                tx.update_payment(&payment).await?;
                SettlementOutcome::Confirmed
            }
            ProviderTransactionStatus::Success => {
                warn!(
                    "Provider reported {} {} for {}, expected {} {}",
                    verified.currency, verified.amount_minor, reference, payment.currency, payment.amount_minor
                );
                payment.transition(PaymentStatus::Failed, now)?;
                merge_metadata(&mut payment.metadata, "verification", verification_record(&verified));
                tx.update_payment(&payment).await?;
                SettlementOutcome::Failed("amount or currency mismatch".to_string())
            }
            ProviderTransactionStatus::Failed => {
                payment.transition(PaymentStatus::Failed, now)?;
                merge_metadata(&mut payment.metadata, "verification", verification_record(&verified));
                tx.update_payment(&payment).await?;
                SettlementOutcome::Failed("declined by provider".to_string())
            }
            ProviderTransactionStatus::Abandoned => SettlementOutcome::Unsettled("abandoned".to_string()),
            ProviderTransactionStatus::Pending(status) => SettlementOutcome::Unsettled(status.clone()),
        };

        if matches!(outcome, SettlementOutcome::Unsettled(_)) {
            tx.rollback().await?;
        } else {
            commit_before(tx, deadline).await?;
        }

        Ok(Settlement {
            appointment,
            payment,
            outcome,
        })
    }

    // ==============================================================================
    // REFUNDS
    // ==============================================================================

    /// Asks the provider to refund and records the result.
    ///
    /// The request is first claimed as PROCESSING in its own transaction, so
    /// only one worker calls the provider for it. A provider failure returns it
    /// to PENDING with the error noted for the next attempt. A claim left
    /// behind by a crashed worker becomes eligible again after ten minutes.
    #[instrument(skip(self, refund), fields(refund_id = %refund.id))]
    pub async fn process_refund(&self, refund: RefundRequest) -> Result<RefundRequest, AppointmentError> {
        if refund.status == RefundStatus::Completed {
            return Ok(refund);
        }

        let (claimed, payment) = match self.claim_refund(refund.id).await? {
            RefundClaim::Claimed(claimed, payment) => (claimed, payment),
            RefundClaim::Settled(current) => return Ok(current),
        };

        let gateway = self.gateways.get(payment.provider)?;
        let outcome = gateway.refund(&payment.provider_reference, claimed.amount_minor).await;

        let now = self.clock.now();
        let mut tx = self.store.begin().await?;
        let mut current = tx
            .lock_refund(claimed.id)
            .await?
            .ok_or_else(|| AppointmentError::NotFound("Refund".to_string()))?;
        if current.status == RefundStatus::Completed {
            tx.rollback().await?;
            return Ok(current);
        }
        current.attempts += 1;
        current.updated_at = now;

        match outcome {
            Ok(receipt) => {
                let mut payment = tx
                    .lock_payment(payment.id)
                    .await?
                    .ok_or_else(|| AppointmentError::NotFound("Payment".to_string()))?;
                if payment.status != PaymentStatus::Refunded {
                    payment.record_refund(current.amount_minor, &current.reason, now)?;
                    merge_metadata(
                        &mut payment.metadata,
                        "refund",
                        json!({ "status": receipt.status, "amount_minor": receipt.amount_minor }),
                    );
                    tx.update_payment(&payment).await?;
                }
                current.status = RefundStatus::Completed;
                current.last_error = None;
                info!("Refunded {} for payment {}", current.amount_minor, payment.provider_reference);
            }
            Err(e) => {
                warn!("Refund attempt {} failed: {}", current.attempts, e);
                current.status = RefundStatus::Pending;
                current.last_error = Some(e.to_string());
            }
        }

        tx.update_refund(&current).await?;
        tx.commit().await?;
        Ok(current)
    }

    /// Marks the refund PROCESSING unless it is finished or freshly claimed by
    /// someone else. A payment that is already refunded completes it here.
    async fn claim_refund(&self, refund_id: Uuid) -> Result<RefundClaim, AppointmentError> {
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;
        let mut refund = tx
            .lock_refund(refund_id)
            .await?
            .ok_or_else(|| AppointmentError::NotFound("Refund".to_string()))?;

        let claim_expired = refund.updated_at < now - Duration::minutes(REFUND_CLAIM_TIMEOUT_MINUTES);
        let busy = match refund.status {
            RefundStatus::Completed => true,
            RefundStatus::Processing => !claim_expired,
            RefundStatus::Pending => false,
        };
        if busy {
            tx.rollback().await?;
            debug!("Refund {} is {}", refund.id, refund.status.as_str());
            return Ok(RefundClaim::Settled(refund));
        }

        let payment = tx
            .lock_payment(refund.payment_id)
            .await?
            .ok_or_else(|| AppointmentError::NotFound("Payment".to_string()))?;

        refund.updated_at = now;
        if payment.status == PaymentStatus::Refunded {
            refund.status = RefundStatus::Completed;
            refund.last_error = None;
            tx.update_refund(&refund).await?;
            tx.commit().await?;
            return Ok(RefundClaim::Settled(refund));
        }

        refund.status = RefundStatus::Processing;
        tx.update_refund(&refund).await?;
        tx.commit().await?;
        Ok(RefundClaim::Claimed(refund, payment))
    }

    /// Returns how many refunds completed in this pass.
    pub async fn retry_pending_refunds(&self, limit: i64) -> Result<usize, AppointmentError> {
        let claimed_before = self.clock.now() - Duration::minutes(REFUND_CLAIM_TIMEOUT_MINUTES);
        let pending = self.store.pending_refunds(claimed_before, limit).await?;
        let mut completed = 0;

        for refund in pending {
            let id = refund.id;
            match self.process_refund(refund).await {
                Ok(updated) if updated.status == RefundStatus::Completed => completed += 1,
                Ok(_) => {}
                Err(e) => warn!("Refund {} could not be processed: {}", id, e),
            }
        }

        Ok(completed)
    }

    /// Appointment together with its current payment, for callers that need both.
    pub async fn appointment_with_payment(
        &self,
        actor: &Actor,
        appointment_id: Uuid,
    ) -> Result<(Appointment, Option<Payment>), AppointmentError> {
        let appointment = self.get_appointment(actor, appointment_id).await?;
        let payment = match appointment.payment_id {
            Some(payment_id) => self.store.get_payment(payment_id).await?,
            None => None,
        };
        Ok((appointment, payment))
    }
}

/// Minutes after which a PROCESSING refund is considered abandoned.
const REFUND_CLAIM_TIMEOUT_MINUTES: i64 = 10;

enum RefundClaim {
    Claimed(RefundRequest, Payment),
    Settled(RefundRequest),
}

/// Outcome for a payment that has already left PENDING.
fn settled_outcome(payment: &Payment) -> Option<SettlementOutcome> {
    match payment.status {
        PaymentStatus::Pending => None,
        PaymentStatus::Success => Some(SettlementOutcome::AlreadyConfirmed),
        PaymentStatus::Failed => Some(SettlementOutcome::Failed("payment previously failed".to_string())),
        PaymentStatus::Cancelled | PaymentStatus::Refunded => {
            Some(SettlementOutcome::Inactive(payment.status.as_str().to_string()))
        }
    }
}

fn verified_matches(payment: &Payment, verified: &VerifiedTransaction, reference: &str) -> bool {
    verified.reference == reference && payment.matches_amount(verified.amount_minor, &verified.currency)
}

fn verification_record(verified: &VerifiedTransaction) -> Value {
    json!({
        "status": verified.status,
        "amount_minor": verified.amount_minor,
        "currency": verified.currency,
        "channel": verified.channel,
        "paid_at": verified.paid_at,
    })
}

fn merge_metadata(metadata: &mut Value, key: &str, value: Value) {
    if !metadata.is_object() {
        *metadata = json!({});
    }
    if let Some(map) = metadata.as_object_mut() {
        map.insert(key.to_string(), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_merge_replaces_non_objects() {
        let mut metadata = Value::Null;
        merge_metadata(&mut metadata, "refund", json!({ "status": "processed" }));
        assert_eq!(metadata["refund"]["status"], "processed");

        merge_metadata(&mut metadata, "verification", json!(true));
        assert_eq!(metadata.as_object().map(|m| m.len()), Some(2));
    }
}
