//! Radio controller seam
//!
//! The runtime hands every controller command to a [`Controller`]. Outcomes
//! are not returned from [`Controller::submit`]; the controller delivers them
//! later as [`ControllerEvent`]s on the channel it was attached to, exactly
//! like an HCI command-complete event would arrive.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use advmux_core::{AdvHandle, BdAddr, ControllerCommand, ControllerEvent, HciStatus};
use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::error::{RuntimeError, RuntimeResult};

#[async_trait]
pub trait Controller: Send {
    /// Give the controller the channel its confirmations go to
    fn attach(&mut self, events: mpsc::Sender<ControllerEvent>);

    /// Issue one command; its confirmation arrives on the attached channel
    async fn submit(&mut self, command: ControllerCommand) -> RuntimeResult<()>;

    fn name(&self) -> &'static str {
        "controller"
    }
}

// ----------------------------------------------------------------------------
// Simulated Controller
// ----------------------------------------------------------------------------

#[derive(Debug, Default)]
struct SimState {
    sent: Vec<ControllerCommand>,
    busy_address_writes: u32,
    failures: Vec<(&'static str, HciStatus)>,
    next_address: u8,
    events: Option<mpsc::Sender<ControllerEvent>>,
}

/// In-memory controller that confirms every command after a fixed latency
#[derive(Debug, Clone)]
pub struct SimulatedController {
    latency: Duration,
    state: Arc<Mutex<SimState>>,
}

impl Default for SimulatedController {
    fn default() -> Self {
        Self::new(Duration::from_millis(2))
    }
}

impl SimulatedController {
    pub fn new(latency: Duration) -> Self {
        Self {
            latency,
            state: Arc::new(Mutex::new(SimState::default())),
        }
    }

    /// Answer the next `count` random address writes with controller-busy
    pub fn with_busy_address_writes(self, count: u32) -> Self {
        self.inject_busy_address_writes(count);
        self
    }

    pub fn inject_busy_address_writes(&self, count: u32) {
        if let Ok(mut state) = self.state.lock() {
            state.busy_address_writes += count;
        }
    }

    /// Fail the next command named `name` with `status`
    pub fn inject_failure(&self, name: &'static str, status: HciStatus) {
        if let Ok(mut state) = self.state.lock() {
            state.failures.push((name, status));
        }
    }

    /// Report that the controller stopped `handle` on its own
    pub async fn terminate(&self, handle: AdvHandle) -> RuntimeResult<()> {
        let events = self.events()?;
        debug!(adv_handle = %handle, "simulating termination");
        events
            .send(ControllerEvent::Terminated { handle, reason: 0x3C })
            .await
            .map_err(|_| RuntimeError::channel_closed("controller event"))
    }

    /// Every command received so far
    pub fn sent(&self) -> Vec<ControllerCommand> {
        self.state
            .lock()
            .map(|state| state.sent.clone())
            .unwrap_or_default()
    }

    pub fn count(&self, name: &str) -> usize {
        self.sent().iter().filter(|command| command.name() == name).count()
    }

    fn events(&self) -> RuntimeResult<mpsc::Sender<ControllerEvent>> {
        self.state
            .lock()
            .ok()
            .and_then(|state| state.events.clone())
            .ok_or_else(|| RuntimeError::controller("simulated controller is not attached"))
    }

    fn answer(&self, command: &ControllerCommand) -> RuntimeResult<ControllerEvent> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| RuntimeError::controller("simulator state poisoned"))?;
        state.sent.push(command.clone());

        let mut status = HciStatus::Success;
        if let Some(index) = state.failures.iter().position(|(name, _)| *name == command.name()) {
            status = state.failures.remove(index).1;
        } else if matches!(command, ControllerCommand::SetRandomAddress { .. })
            && state.busy_address_writes > 0
        {
            state.busy_address_writes -= 1;
            status = HciStatus::ControllerBusy;
        }

        state.next_address = state.next_address.wrapping_add(1);
        // Resolvable private address: top two bits 01
        let resolved = BdAddr::new([0x40 | (state.next_address >> 2), 0x5A, 0x11, 0x00, 0x00, state.next_address]);
        Ok(ControllerEvent::answering(command, status, resolved))
    }
}

#[async_trait]
impl Controller for SimulatedController {
    fn attach(&mut self, events: mpsc::Sender<ControllerEvent>) {
        if let Ok(mut state) = self.state.lock() {
            state.events = Some(events);
        }
    }

    async fn submit(&mut self, command: ControllerCommand) -> RuntimeResult<()> {
        let events = self.events()?;
        let event = self.answer(&command)?;
        trace!(command = command.name(), adv_handle = %command.handle(), "simulated command");

        let latency = self.latency;
        tokio::spawn(async move {
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }
            let _ = events.send(event).await;
        });
        Ok(())
    }

    fn name(&self) -> &'static str {
        "simulated"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_confirms_after_latency() {
        let mut controller = SimulatedController::new(Duration::from_millis(1));
        let (tx, mut rx) = mpsc::channel(4);
        controller.attach(tx);

        let handle = AdvHandle::new(1);
        controller
            .submit(ControllerCommand::Register { handle })
            .await
            .unwrap();
        assert_eq!(
            rx.recv().await,
            Some(ControllerEvent::RegisterCfm {
                handle,
                status: HciStatus::Success
            })
        );
        assert_eq!(controller.count("Register"), 1);
    }

    #[tokio::test]
    async fn test_busy_injection_only_hits_address_writes() {
        let mut controller = SimulatedController::new(Duration::ZERO).with_busy_address_writes(1);
        let (tx, mut rx) = mpsc::channel(4);
        controller.attach(tx);
        let handle = AdvHandle::new(2);

        controller
            .submit(ControllerCommand::Enable { handle, enable: true })
            .await
            .unwrap();
        assert!(matches!(
            rx.recv().await,
            Some(ControllerEvent::EnableCfm { status: HciStatus::Success, .. })
        ));

        let write = ControllerCommand::SetRandomAddress {
            handle,
            kind: advmux_core::LocalAddressKind::GenerateResolvable,
            address: BdAddr::ZERO,
        };
        controller.submit(write.clone()).await.unwrap();
        assert!(matches!(
            rx.recv().await,
            Some(ControllerEvent::SetRandomAddressCfm { status: HciStatus::ControllerBusy, .. })
        ));

        controller.submit(write).await.unwrap();
        match rx.recv().await {
            Some(ControllerEvent::SetRandomAddressCfm { status, address, .. }) => {
                assert_eq!(status, HciStatus::Success);
                assert!(!address.is_zero());
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unattached_controller_refuses_commands() {
        let mut controller = SimulatedController::default();
        let result = controller
            .submit(ControllerCommand::Register {
                handle: AdvHandle::new(1),
            })
            .await;
        assert!(matches!(result, Err(RuntimeError::Controller { .. })));
        assert!(controller.terminate(AdvHandle::new(1)).await.is_err());
    }
}
