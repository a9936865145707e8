//! Slot connection management
//!
//! Owns the lifecycle of each physical connection: the connect walk over the
//! tenant's driver fallback order, supervision of the driver event stream,
//! reconnect-with-backoff after unintended disconnects, and degradation
//! tracking on repeated send failures. Retry policy for individual sends
//! lives in the scheduler; this manager only classifies and reports.

use std::sync::Arc;

use tracing::{debug, info, warn};

use courier_core::{
    ConnectConfig, DispatchError, DriverError, DriverEvent, DriverEvents, DriverRegistry,
    DriverResult, OutboundMessage, RecipientId, Result, SendReceipt, SessionDriver, SlotEvent,
};

use crate::events::{EngineEvent, EngineEventSender};
use crate::pool::SlotHandle;

// ----------------------------------------------------------------------------
// Slot Connection Manager
// ----------------------------------------------------------------------------

/// Drives slot lifecycles against the registered drivers
///
/// Cloning is cheap (the registry is shared); supervision and reconnect
/// tasks each carry their own clone.
#[derive(Clone)]
pub struct SlotConnectionManager {
    registry: Arc<DriverRegistry>,
    config: ConnectConfig,
}

impl SlotConnectionManager {
    pub fn new(registry: Arc<DriverRegistry>, config: ConnectConfig) -> Self {
        Self { registry, config }
    }

    pub fn registry(&self) -> &DriverRegistry {
        &self.registry
    }

    /// Establish a slot's connection, walking the fallback order
    ///
    /// Each driver gets one bounded attempt (connect plus authentication
    /// within `connect_timeout`); total failure is reported only after the
    /// whole order is exhausted. On success a supervision task watches the
    /// driver stream for the connection's remaining lifetime.
    pub async fn connect_slot(
        &self,
        slot: &Arc<SlotHandle>,
        order: Vec<String>,
        events: EngineEventSender,
    ) -> Result<()> {
        if slot.state_name() != "Disconnected" {
            return Err(DispatchError::config_error(format!(
                "slot {} is {}, expected Disconnected",
                slot.id,
                slot.state_name()
            )));
        }

        let drivers = self.registry.ordered(&order);
        if drivers.is_empty() {
            return Err(DispatchError::config_error("no session drivers registered"));
        }

        slot.set_manually_disconnected(false);
        let mut last_error = DriverError::unknown("no driver attempted");

        for driver in drivers {
            if slot.is_manually_disconnected() {
                debug!(slot = %slot.id, "connect walk aborted by manual disconnect");
                return Ok(());
            }

            self.apply_and_publish(
                slot,
                SlotEvent::ConnectRequested {
                    driver: driver.name().to_string(),
                },
                &events,
            );

            let attempt = self.attempt_connect(driver.clone(), slot, &events);
            match tokio::time::timeout(self.config.connect_timeout, attempt).await {
                Ok(Ok(stream)) => {
                    info!(slot = %slot.id, driver = driver.name(), "slot connected");
                    slot.reset_reconnect_attempts();
                    self.spawn_supervisor(slot.clone(), order, events, stream);
                    return Ok(());
                }
                Ok(Err(error)) => {
                    warn!(slot = %slot.id, driver = driver.name(), %error, "connect attempt failed");
                    self.apply_and_publish(
                        slot,
                        SlotEvent::AttemptFailed {
                            reason: error.to_string(),
                        },
                        &events,
                    );
                    last_error = error;
                }
                Err(_) => {
                    warn!(slot = %slot.id, driver = driver.name(), "connect attempt timed out");
                    // Best-effort cleanup of the half-open attempt
                    let _ = driver.disconnect(&slot.id).await;
                    let error = DriverError::unreachable("connect timed out");
                    self.apply_and_publish(
                        slot,
                        SlotEvent::AttemptFailed {
                            reason: error.to_string(),
                        },
                        &events,
                    );
                    last_error = error;
                }
            }
        }

        let _ = events.send(EngineEvent::SlotConnectFailed {
            slot: slot.id.clone(),
            reason: last_error.to_string(),
        });
        Err(DispatchError::Driver(last_error))
    }

    /// One driver's connect-plus-auth attempt; returns the live stream on
    /// success so the supervisor can take it over
    async fn attempt_connect(
        &self,
        driver: Arc<dyn SessionDriver>,
        slot: &Arc<SlotHandle>,
        events: &EngineEventSender,
    ) -> DriverResult<DriverEvents> {
        let mut stream = driver.connect(&slot.id).await?;

        loop {
            match stream.recv().await {
                Some(DriverEvent::PairingRequired { artifact }) => {
                    self.apply_and_publish(
                        slot,
                        SlotEvent::PairingIssued {
                            artifact: artifact.clone(),
                        },
                        events,
                    );
                    let _ = events.send(EngineEvent::PairingRequired {
                        slot: slot.id.clone(),
                        artifact,
                    });
                }
                Some(DriverEvent::Authenticated { identity }) => {
                    self.apply_and_publish(slot, SlotEvent::AuthSucceeded { identity }, events);
                    return Ok(stream);
                }
                Some(DriverEvent::Closed { reason }) => {
                    return Err(DriverError::unreachable(reason));
                }
                None => {
                    return Err(DriverError::unreachable("driver event stream ended"));
                }
            }
        }
    }

    /// Watch an established connection's stream until it closes
    fn spawn_supervisor(
        &self,
        slot: Arc<SlotHandle>,
        order: Vec<String>,
        events: EngineEventSender,
        mut stream: DriverEvents,
    ) {
        let manager = self.clone();
        tokio::spawn(async move {
            let reason = loop {
                match stream.recv().await {
                    Some(DriverEvent::Closed { reason }) => break reason,
                    Some(_) => continue,
                    None => break "driver event stream ended".to_string(),
                }
            };

            if slot.is_manually_disconnected() {
                debug!(slot = %slot.id, "stream closed after manual disconnect");
                return;
            }

            info!(slot = %slot.id, %reason, "unexpected disconnect");
            manager.apply_and_publish(&slot, SlotEvent::ConnectionLost { reason }, &events);
            manager.schedule_reconnect(slot, order, events);
        });
    }

    /// Reconnect after a backoff delay; manual disconnects never reach here
    fn schedule_reconnect(
        &self,
        slot: Arc<SlotHandle>,
        order: Vec<String>,
        events: EngineEventSender,
    ) {
        let manager = self.clone();
        tokio::spawn(async move {
            let attempt = slot.next_reconnect_attempt();
            let delay = manager.config.reconnect_delay(attempt);
            debug!(slot = %slot.id, attempt, ?delay, "reconnect scheduled");
            tokio::time::sleep(delay).await;

            if slot.is_manually_disconnected() {
                return;
            }
            if let Err(error) = manager.connect_slot(&slot, order.clone(), events.clone()).await {
                warn!(slot = %slot.id, %error, "reconnect failed");
                manager.schedule_reconnect(slot, order, events);
            }
        });
    }

    /// Send one message through an established slot
    ///
    /// Holds the slot's send gate across the driver call so sends on one
    /// physical connection are strictly ordered. No tenant-wide lock is
    /// taken here.
    pub async fn send(
        &self,
        slot: &Arc<SlotHandle>,
        recipient: &RecipientId,
        message: &OutboundMessage,
        events: &EngineEventSender,
    ) -> DriverResult<SendReceipt> {
        let _gate = slot.acquire_send_gate().await;

        let driver_name = {
            let state = slot.state();
            if !state.can_attempt_send() {
                return Err(DriverError::unreachable(format!(
                    "slot {} is {}",
                    slot.id,
                    state.state_name()
                )));
            }
            state
                .driver_name()
                .expect("sendable state always has a driver")
                .to_string()
        };

        let driver = self
            .registry
            .get(&driver_name)
            .ok_or_else(|| DriverError::unknown(format!("driver {driver_name} vanished")))?;

        let outcome =
            tokio::time::timeout(self.config.send_timeout, driver.send(&slot.id, recipient, message))
                .await;

        match outcome {
            Ok(Ok(receipt)) => {
                slot.record_send_success();
                let recovered = slot.state_name() == "Degraded";
                self.apply_and_publish(slot, SlotEvent::SendSucceeded, events);
                if recovered {
                    info!(slot = %slot.id, "slot recovered from degraded state");
                }
                Ok(receipt)
            }
            Ok(Err(error)) => {
                self.note_send_failure(slot, &error, events);
                Err(error)
            }
            Err(_) => {
                let error = DriverError::unreachable("send timed out");
                self.note_send_failure(slot, &error, events);
                Err(error)
            }
        }
    }

    /// Degrade or drop the slot when consecutive failures cross thresholds
    fn note_send_failure(
        &self,
        slot: &Arc<SlotHandle>,
        error: &DriverError,
        events: &EngineEventSender,
    ) {
        let consecutive = slot.record_send_failure();
        debug!(slot = %slot.id, consecutive, %error, "send failed");

        match slot.state_name() {
            "Connected" if consecutive >= self.config.degrade_threshold => {
                self.apply_and_publish(
                    slot,
                    SlotEvent::Degrade {
                        reason: format!("{consecutive} consecutive send failures"),
                    },
                    events,
                );
            }
            "Degraded" if consecutive >= self.config.disconnect_threshold => {
                let driver_name = slot.active_driver();
                self.apply_and_publish(
                    slot,
                    SlotEvent::ConnectionLost {
                        reason: format!("{consecutive} consecutive send failures"),
                    },
                    events,
                );
                // Tear down driver state; the supervisor observes the close
                // and owns the reconnect decision
                if let Some(driver) = driver_name.and_then(|name| self.registry.get(&name)) {
                    let slot_id = slot.id.clone();
                    tokio::spawn(async move {
                        let _ = driver.disconnect(&slot_id).await;
                    });
                }
            }
            _ => {}
        }
    }

    /// Operator-initiated disconnect; never auto-reconnects
    ///
    /// Queued assignment purge is the engine's job (it owns the queue); this
    /// only handles the connection side.
    pub async fn disconnect_slot(
        &self,
        slot: &Arc<SlotHandle>,
        events: &EngineEventSender,
    ) -> Result<()> {
        slot.set_manually_disconnected(true);
        let driver_name = slot.active_driver();

        if let Ok(audit) = slot.apply(SlotEvent::ManualDisconnect) {
            let _ = events.send(EngineEvent::SlotStateChanged {
                slot: slot.id.clone(),
                from: audit.from_state,
                to: audit.to_state,
            });
        }

        if let Some(name) = driver_name {
            if let Some(driver) = self.registry.get(&name) {
                if let Err(error) = driver.disconnect(&slot.id).await {
                    warn!(slot = %slot.id, %error, "driver disconnect failed");
                }
            }
        }

        info!(slot = %slot.id, "slot manually disconnected");
        Ok(())
    }

    fn apply_and_publish(
        &self,
        slot: &Arc<SlotHandle>,
        event: SlotEvent,
        events: &EngineEventSender,
    ) {
        match slot.apply(event) {
            Ok(audit) => {
                let _ = events.send(EngineEvent::SlotStateChanged {
                    slot: slot.id.clone(),
                    from: audit.from_state,
                    to: audit.to_state,
                });
            }
            Err(error) => {
                // Benign races (e.g. a close arriving after a threshold
                // disconnect) land here; the state is already where the
                // loser wanted to move away from
                debug!(slot = %slot.id, %error, "transition skipped");
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
