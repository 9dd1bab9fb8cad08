//! Advertising-Set State Machine
//!
//! One instance drives one hardware advertising set through the controller
//! protocol. Requests are serialized behind the instance's own gate: only the
//! steady states (`Unregistered`, `Idle`, `Active`) release it, so at most one
//! controller exchange is ever outstanding per set. Results are reported as
//! [`SmNotification`]s rather than callbacks, which keeps the instance free of
//! references back into the scheduler.

use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use rand_chacha::ChaCha8Rng;
use rand_core::RngCore;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::channel::{ControllerCommand, ControllerEvent, Effect, HciStatus, SetParams, TimerId};
use crate::errors::ContractError;
use crate::gate::Gate;
use crate::payload::{ChunkedPayload, SegmentedPayload};
use crate::types::{AdvHandle, BdAddr};

// ----------------------------------------------------------------------------
// States, Requests and Notifications
// ----------------------------------------------------------------------------

/// Protocol state of one hardware advertising set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SetState {
    Null,
    Unregistered,
    Registering,
    Idle,
    ConfiguringParams,
    ConfiguringAddress,
    ConfiguringData,
    ConfiguringScanResponse,
    Enabling,
    Active,
    Suspending,
    Unregistering,
}

impl SetState {
    /// Steady states have no controller exchange outstanding
    pub fn is_steady(&self) -> bool {
        matches!(self, Self::Null | Self::Unregistered | Self::Idle | Self::Active)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Null => "Null",
            Self::Unregistered => "Unregistered",
            Self::Registering => "Registering",
            Self::Idle => "Idle",
            Self::ConfiguringParams => "ConfiguringParams",
            Self::ConfiguringAddress => "ConfiguringAddress",
            Self::ConfiguringData => "ConfiguringData",
            Self::ConfiguringScanResponse => "ConfiguringScanResponse",
            Self::Enabling => "Enabling",
            Self::Active => "Active",
            Self::Suspending => "Suspending",
            Self::Unregistering => "Unregistering",
        }
    }
}

impl fmt::Display for SetState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Payloads for one data update
#[derive(Debug, Default)]
pub struct SetData {
    pub advertising: Option<ChunkedPayload>,
    pub scan_response: Option<ChunkedPayload>,
}

/// Operations accepted by an instance, processed one at a time
#[derive(Debug)]
pub enum SmRequest {
    Register,
    UpdateParams(SetParams),
    UpdateData(SetData),
    Enable,
    Disable,
    Unregister,
}

impl SmRequest {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Register => "Register",
            Self::UpdateParams(_) => "UpdateParams",
            Self::UpdateData(_) => "UpdateData",
            Self::Enable => "Enable",
            Self::Disable => "Disable",
            Self::Unregister => "Unregister",
        }
    }
}

/// Outcomes reported by an instance to its owner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SmNotification {
    RegisterCfm { success: bool },
    UpdateParamsCfm { success: bool },
    UpdateDataCfm { success: bool },
    EnableCfm { success: bool },
    DisableCfm { success: bool },
    UnregisterCfm { success: bool },
    /// The controller stopped the set and re-advertising failed
    Stopped,
    RotationTimeout,
    AddressChanged(BdAddr),
}

/// Sinks an instance writes into while handling a request or event
pub struct SmOutput<'a> {
    pub effects: &'a mut Vec<Effect>,
    pub notifications: &'a mut VecDeque<(AdvHandle, SmNotification)>,
    pub rng: &'a mut ChaCha8Rng,
}

// ----------------------------------------------------------------------------
// State Machine Instance
// ----------------------------------------------------------------------------

#[derive(Debug)]
pub struct SetStateMachine {
    handle: AdvHandle,
    state: SetState,
    target: SetState,
    /// Steady state to return to once a configuration step finishes
    resume: SetState,
    gate: Gate<SmRequest>,
    params: Option<SetParams>,
    pending_scan_response: Option<SegmentedPayload>,
    resolved_address: Option<BdAddr>,
    retry_limit: u8,
    retries_left: u8,
    terminate_processing: bool,
    rotation_armed: bool,
}

impl SetStateMachine {
    pub fn new(handle: AdvHandle, retry_limit: u8) -> Self {
        let sm = Self {
            handle,
            state: SetState::Null,
            target: SetState::Idle,
            resume: SetState::Idle,
            gate: Gate::new(),
            params: None,
            pending_scan_response: None,
            resolved_address: None,
            retry_limit,
            retries_left: retry_limit,
            terminate_processing: false,
            rotation_armed: false,
        };
        debug!(adv_handle = %handle, "state machine created");
        sm
    }

    /// Bring a freshly created instance from Null to Unregistered
    pub fn init(&mut self) {
        if self.state == SetState::Null {
            self.state = SetState::Unregistered;
            debug!(adv_handle = %self.handle, from = %SetState::Null, to = %self.state, "set state");
        }
    }

    pub fn handle(&self) -> AdvHandle {
        self.handle
    }

    pub fn state(&self) -> SetState {
        self.state
    }

    pub fn target(&self) -> SetState {
        self.target
    }

    pub fn params(&self) -> Option<&SetParams> {
        self.params.as_ref()
    }

    pub fn resolved_address(&self) -> Option<BdAddr> {
        self.resolved_address
    }

    /// Whether a controller exchange is outstanding
    pub fn is_busy(&self) -> bool {
        self.gate.is_held()
    }

    pub fn pending_requests(&self) -> usize {
        self.gate.pending()
    }

    pub fn rotation_armed(&self) -> bool {
        self.rotation_armed
    }

    /// Queue `request` behind any outstanding exchange
    pub fn submit(&mut self, request: SmRequest, out: &mut SmOutput<'_>) {
        trace!(adv_handle = %self.handle, request = request.name(), "request queued");
        self.gate.defer(request);
        self.pump(out);
    }

    fn pump(&mut self, out: &mut SmOutput<'_>) {
        while let Some(request) = self.gate.admit_next() {
            self.process(request, out);
        }
    }

    fn process(&mut self, request: SmRequest, out: &mut SmOutput<'_>) {
        debug!(adv_handle = %self.handle, request = request.name(), state = %self.state, "processing request");

        match (request, self.state) {
            (SmRequest::Register, SetState::Unregistered) => {
                self.enter(SetState::Registering, out);
                self.issue(ControllerCommand::Register { handle: self.handle }, out);
            }
            (SmRequest::Register, _) => self.finish(SmNotification::RegisterCfm { success: false }, out),

            (SmRequest::UpdateParams(params), SetState::Idle | SetState::Active) => {
                self.params = Some(params);
                self.resume = self.state;
                self.enter(SetState::ConfiguringParams, out);
                self.issue(
                    ControllerCommand::SetParams {
                        handle: self.handle,
                        params,
                    },
                    out,
                );
            }
            (SmRequest::UpdateParams(_), _) => {
                self.finish(SmNotification::UpdateParamsCfm { success: false }, out)
            }

            (SmRequest::UpdateData(data), SetState::Idle | SetState::Active) => {
                self.start_data_update(data, out)
            }
            (SmRequest::UpdateData(_), _) => {
                self.finish(SmNotification::UpdateDataCfm { success: false }, out)
            }

            (SmRequest::Enable, SetState::Idle) => {
                self.target = SetState::Active;
                self.enter(SetState::Enabling, out);
                self.issue(
                    ControllerCommand::Enable {
                        handle: self.handle,
                        enable: true,
                    },
                    out,
                );
            }
            (SmRequest::Enable, SetState::Active) => {
                self.finish(SmNotification::EnableCfm { success: true }, out)
            }
            (SmRequest::Enable, _) => self.finish(SmNotification::EnableCfm { success: false }, out),

            (SmRequest::Disable, SetState::Active) => {
                self.target = SetState::Idle;
                self.enter(SetState::Suspending, out);
                self.issue(
                    ControllerCommand::Enable {
                        handle: self.handle,
                        enable: false,
                    },
                    out,
                );
            }
            (SmRequest::Disable, SetState::Idle) => {
                self.finish(SmNotification::DisableCfm { success: true }, out)
            }
            (SmRequest::Disable, _) => self.finish(SmNotification::DisableCfm { success: false }, out),

            (SmRequest::Unregister, SetState::Idle) => {
                self.target = SetState::Unregistered;
                self.resume = SetState::Idle;
                self.enter(SetState::Unregistering, out);
                self.issue(ControllerCommand::Unregister { handle: self.handle }, out);
            }
            (SmRequest::Unregister, state) => {
                debug!(adv_handle = %self.handle, state = %state, "unregister refused outside Idle");
                self.finish(SmNotification::UnregisterCfm { success: false }, out)
            }
        }
    }

    fn start_data_update(&mut self, data: SetData, out: &mut SmOutput<'_>) {
        let advertising = data.advertising.filter(|p| !p.is_empty());
        let scan_response = data.scan_response.filter(|p| !p.is_empty());

        if advertising.is_none() && scan_response.is_none() {
            self.finish(SmNotification::UpdateDataCfm { success: true }, out);
            return;
        }

        self.resume = self.state;
        self.pending_scan_response = scan_response.map(|mut p| p.take());

        match advertising {
            Some(mut payload) => {
                self.enter(SetState::ConfiguringData, out);
                self.issue(
                    ControllerCommand::SetAdvertisingData {
                        handle: self.handle,
                        payload: payload.take(),
                    },
                    out,
                );
            }
            None => self.send_scan_response(out),
        }
    }

    fn send_scan_response(&mut self, out: &mut SmOutput<'_>) {
        let Some(payload) = self.pending_scan_response.take() else {
            return;
        };
        self.enter(SetState::ConfiguringScanResponse, out);
        self.issue(
            ControllerCommand::SetScanResponseData {
                handle: self.handle,
                payload,
            },
            out,
        );
    }

    // ------------------------------------------------------------------------
    // Controller Events
    // ------------------------------------------------------------------------

    /// Apply a confirmation or indication addressed to this instance
    pub fn handle_event(&mut self, event: &ControllerEvent, out: &mut SmOutput<'_>) {
        match (*event, self.state) {
            (ControllerEvent::RegisterCfm { status, .. }, SetState::Registering) => {
                let success = status.is_success();
                self.enter(
                    if success {
                        SetState::Idle
                    } else {
                        SetState::Unregistered
                    },
                    out,
                );
                self.notify(SmNotification::RegisterCfm { success }, out);
            }

            (ControllerEvent::SetParamsCfm { status, .. }, SetState::ConfiguringParams) => {
                let needs_address = self
                    .params
                    .map_or(false, |p| p.params.own_address_type.requires_address_write());

                if status.is_success() && needs_address {
                    self.retries_left = self.retry_limit;
                    self.enter(SetState::ConfiguringAddress, out);
                    self.write_random_address(out);
                } else {
                    if !status.is_success() {
                        warn!(adv_handle = %self.handle, %status, "set params failed");
                    }
                    self.enter(self.resume, out);
                    self.notify(
                        SmNotification::UpdateParamsCfm {
                            success: status.is_success(),
                        },
                        out,
                    );
                }
            }

            (ControllerEvent::SetRandomAddressCfm { status, address, .. }, SetState::ConfiguringAddress) => {
                self.handle_address_cfm(status, address, out)
            }

            (ControllerEvent::SetDataCfm { status, .. }, SetState::ConfiguringData) => {
                if status.is_success() && self.pending_scan_response.is_some() {
                    self.send_scan_response(out);
                } else {
                    if !status.is_success() {
                        warn!(adv_handle = %self.handle, %status, "set advertising data failed");
                        self.pending_scan_response = None;
                    }
                    self.enter(self.resume, out);
                    self.notify(
                        SmNotification::UpdateDataCfm {
                            success: status.is_success(),
                        },
                        out,
                    );
                }
            }

            (ControllerEvent::SetScanResponseDataCfm { status, .. }, SetState::ConfiguringScanResponse) => {
                if !status.is_success() {
                    warn!(adv_handle = %self.handle, %status, "set scan response data failed");
                }
                self.enter(self.resume, out);
                self.notify(
                    SmNotification::UpdateDataCfm {
                        success: status.is_success(),
                    },
                    out,
                );
            }

            (ControllerEvent::EnableCfm { status, .. }, SetState::Enabling) => {
                self.handle_enable_cfm(status, out)
            }

            (ControllerEvent::EnableCfm { status, .. }, SetState::Suspending) => {
                let success = status.is_success();
                if success {
                    self.enter(SetState::Idle, out);
                } else {
                    warn!(adv_handle = %self.handle, %status, "disable failed");
                    self.target = SetState::Active;
                    self.enter(SetState::Active, out);
                }
                self.notify(SmNotification::DisableCfm { success }, out);
            }

            (ControllerEvent::Terminated { reason, .. }, SetState::Active) => {
                debug!(adv_handle = %self.handle, reason, "terminated while active, re-advertising");
                if self.gate.acquire() {
                    self.terminate_processing = true;
                    self.enter(SetState::Enabling, out);
                    self.issue(
                        ControllerCommand::Enable {
                            handle: self.handle,
                            enable: true,
                        },
                        out,
                    );
                }
            }

            (ControllerEvent::UnregisterCfm { status, .. }, SetState::Unregistering) => {
                let success = status.is_success();
                if success {
                    self.enter(SetState::Unregistered, out);
                } else {
                    warn!(adv_handle = %self.handle, %status, "unregister failed");
                    self.target = self.resume;
                    self.enter(self.resume, out);
                }
                self.notify(SmNotification::UnregisterCfm { success }, out);
            }

            (event, state) => {
                debug!(adv_handle = %self.handle, ?event, state = %state, "event not expected in this state, ignored");
                return;
            }
        }

        self.pump(out);
    }

    fn handle_address_cfm(&mut self, status: HciStatus, address: BdAddr, out: &mut SmOutput<'_>) {
        match status {
            HciStatus::Success => {
                let explicit = self.params.and_then(|p| p.params.random_address);
                let resolved = explicit.unwrap_or(address);
                self.resolved_address = Some(resolved);
                self.enter(self.resume, out);
                self.notify(SmNotification::AddressChanged(resolved), out);
                self.notify(SmNotification::UpdateParamsCfm { success: true }, out);
            }
            HciStatus::ControllerBusy if self.retries_left > 0 => {
                self.retries_left -= 1;
                debug!(adv_handle = %self.handle, retries_left = self.retries_left, "controller busy, retrying address write");
                self.write_random_address(out);
            }
            status => {
                warn!(adv_handle = %self.handle, %status, "random address write gave up");
                self.enter(self.resume, out);
                self.notify(SmNotification::UpdateParamsCfm { success: false }, out);
            }
        }
    }

    fn handle_enable_cfm(&mut self, status: HciStatus, out: &mut SmOutput<'_>) {
        let auto_readvertise = core::mem::take(&mut self.terminate_processing);

        if status.is_success() {
            self.target = SetState::Active;
            self.enter(SetState::Active, out);
            if !auto_readvertise {
                self.notify(SmNotification::EnableCfm { success: true }, out);
            }
            return;
        }

        warn!(adv_handle = %self.handle, %status, auto_readvertise, "enable failed");
        self.target = SetState::Idle;
        self.enter(SetState::Idle, out);
        self.notify(
            if auto_readvertise {
                SmNotification::Stopped
            } else {
                SmNotification::EnableCfm { success: false }
            },
            out,
        );
    }

    fn write_random_address(&mut self, out: &mut SmOutput<'_>) {
        let Some(params) = self.params else {
            return;
        };
        self.issue(
            ControllerCommand::SetRandomAddress {
                handle: self.handle,
                kind: params.params.random_address_kind,
                address: params.params.random_address.unwrap_or(BdAddr::ZERO),
            },
            out,
        );
    }

    /// Rotation timer expiry for this instance
    pub fn handle_rotation_timeout(&mut self, out: &mut SmOutput<'_>) {
        self.rotation_armed = false;
        if self.state == SetState::Active {
            self.notify(SmNotification::RotationTimeout, out);
        } else {
            debug!(adv_handle = %self.handle, state = %self.state, "rotation timeout outside Active ignored");
        }
    }

    // ------------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------------

    fn enter(&mut self, state: SetState, out: &mut SmOutput<'_>) {
        let previous = self.state;
        self.state = state;
        debug!(adv_handle = %self.handle, from = %previous, to = %state, "set state");

        if previous == SetState::Active && state != SetState::Active {
            self.cancel_rotation(out);
        }
        if state == SetState::Active && previous != SetState::Active {
            self.arm_rotation(out);
        }
        if state.is_steady() {
            self.gate.release();
        }
    }

    /// Report an outcome without touching the controller
    fn finish(&mut self, notification: SmNotification, out: &mut SmOutput<'_>) {
        self.notify(notification, out);
        self.gate.release();
    }

    fn issue(&self, command: ControllerCommand, out: &mut SmOutput<'_>) {
        trace!(adv_handle = %self.handle, command = command.name(), "controller command");
        out.effects.push(Effect::Controller(command));
    }

    fn notify(&self, notification: SmNotification, out: &mut SmOutput<'_>) {
        out.notifications.push_back((self.handle, notification));
    }

    fn arm_rotation(&mut self, out: &mut SmOutput<'_>) {
        let Some(params) = self.params.map(|p| p.params) else {
            return;
        };
        if !params.rotates_address() {
            return;
        }

        if self.rotation_armed {
            out.effects.push(Effect::CancelTimer {
                timer: TimerId::AddressRotation(self.handle),
            });
        }

        let window = params.rotation.max_secs - params.rotation.min_secs;
        let secs = params.rotation.min_secs + out.rng.next_u32() % window;
        out.effects.push(Effect::StartTimer {
            timer: TimerId::AddressRotation(self.handle),
            after: Duration::from_secs(u64::from(secs)),
        });
        self.rotation_armed = true;
    }

    fn cancel_rotation(&mut self, out: &mut SmOutput<'_>) {
        if self.rotation_armed {
            out.effects.push(Effect::CancelTimer {
                timer: TimerId::AddressRotation(self.handle),
            });
            self.rotation_armed = false;
        }
    }
}

// ----------------------------------------------------------------------------
// State Machine Table
// ----------------------------------------------------------------------------

/// Fixed table of instances, one per hardware advertising set
#[derive(Debug)]
pub struct SmTable {
    slots: Vec<Option<SetStateMachine>>,
    retry_limit: u8,
}

impl SmTable {
    pub fn new(capacity: usize, retry_limit: u8) -> Self {
        let capacity = capacity.min(u8::MAX as usize);
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            retry_limit,
        }
    }

    /// Claim the lowest free hardware handle
    pub fn create(&mut self) -> Option<AdvHandle> {
        let index = self.slots.iter().position(Option::is_none)?;
        let handle = AdvHandle::new(index as u8 + 1);
        let mut sm = SetStateMachine::new(handle, self.retry_limit);
        sm.init();
        self.slots[index] = Some(sm);
        Some(handle)
    }

    pub fn get(&self, handle: AdvHandle) -> Option<&SetStateMachine> {
        self.slots.get(handle.slot()?)?.as_ref()
    }

    pub fn get_mut(&mut self, handle: AdvHandle) -> Option<&mut SetStateMachine> {
        self.slots.get_mut(handle.slot()?)?.as_mut()
    }

    /// Release an instance; only legal once it is back to Unregistered
    pub fn destroy(&mut self, handle: AdvHandle) -> Result<(), ContractError> {
        let slot = handle
            .slot()
            .and_then(|index| self.slots.get_mut(index))
            .ok_or(ContractError::UnknownInstance(handle))?;

        match slot {
            Some(sm) if sm.state == SetState::Unregistered => {
                debug!(adv_handle = %handle, "state machine destroyed");
                *slot = None;
                Ok(())
            }
            Some(sm) => Err(ContractError::InstanceNotUnregistered {
                handle,
                state: sm.state.name(),
            }),
            None => Err(ContractError::UnknownInstance(handle)),
        }
    }

    /// Number of hardware sets the table was sized for
    pub fn supported(&self) -> usize {
        self.slots.len()
    }

    pub fn in_use(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }
}
