//! Advertising Runtime
//!
//! A single task owns the [`AdvertisingManager`] and serializes everything
//! that touches it: client commands, controller confirmations and timer
//! expiries all arrive on channels and are handled one at a time. After each
//! input the task drains the manager's effects, forwarding controller commands
//! to the attached [`Controller`] and arming or cancelling tokio timers.

use std::collections::HashMap;

use advmux_core::{AdvertisingManager, ControllerEvent, Effect, TimerId};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::command::Command;
use crate::controller::Controller;
use crate::error::{RuntimeError, RuntimeResult};

/// Timer expiry tagged with the generation it was armed under
type TimerFired = (TimerId, u64);

// ----------------------------------------------------------------------------
// Advertising Runtime
// ----------------------------------------------------------------------------

pub struct AdvertisingRuntime {
    manager: AdvertisingManager,
    controller: Box<dyn Controller>,
    command_receiver: mpsc::Receiver<Command>,
    event_receiver: mpsc::Receiver<ControllerEvent>,
    timer_sender: mpsc::UnboundedSender<TimerFired>,
    timer_receiver: mpsc::UnboundedReceiver<TimerFired>,
    /// Armed timers; a re-armed timer gets a fresh generation
    timers: HashMap<TimerId, (u64, JoinHandle<()>)>,
    generation: u64,
    running: bool,
}

impl AdvertisingRuntime {
    /// Wire a manager to its controller; the controller is attached to the event channel here
    pub fn new(
        manager: AdvertisingManager,
        mut controller: Box<dyn Controller>,
        command_receiver: mpsc::Receiver<Command>,
        event_buffer_size: usize,
    ) -> Self {
        let (event_sender, event_receiver) = mpsc::channel(event_buffer_size);
        controller.attach(event_sender);
        let (timer_sender, timer_receiver) = mpsc::unbounded_channel();

        Self {
            manager,
            controller,
            command_receiver,
            event_receiver,
            timer_sender,
            timer_receiver,
            timers: HashMap::new(),
            generation: 0,
            running: false,
        }
    }

    /// Run until shutdown is requested or every handle is dropped
    pub async fn run(mut self) -> RuntimeResult<()> {
        self.running = true;
        info!(controller = self.controller.name(), "Advertising runtime started");

        let result = self.event_loop().await;

        for (_, (_, handle)) in self.timers.drain() {
            handle.abort();
        }
        self.running = false;
        match &result {
            Ok(()) => info!("Advertising runtime stopped"),
            Err(err) => warn!(error = %err, "Advertising runtime stopped with error"),
        }
        result
    }

    async fn event_loop(&mut self) -> RuntimeResult<()> {
        while self.running {
            tokio::select! {
                command = self.command_receiver.recv() => {
                    match command {
                        Some(command) => self.handle_command(command),
                        None => {
                            debug!("All runtime handles dropped");
                            self.running = false;
                        }
                    }
                }

                event = self.event_receiver.recv() => {
                    match event {
                        Some(event) => {
                            trace!(?event, "Controller event");
                            self.manager.handle_controller_event(event);
                        }
                        None => return Err(RuntimeError::channel_closed("controller event")),
                    }
                }

                Some((timer, generation)) = self.timer_receiver.recv() => {
                    self.handle_timer(timer, generation);
                }
            }

            self.flush_effects().await?;
        }
        Ok(())
    }

    fn handle_command(&mut self, command: Command) {
        trace!(command = command.name(), "Runtime command");
        match command {
            Command::RegisterItem { item, reply } => {
                let _ = reply.send(self.manager.register_item(item));
            }
            Command::RegisterGapFlags { item, reply } => {
                let _ = reply.send(self.manager.register_gap_flags_item(item));
            }
            Command::UpdateItem { handle, reply } => {
                let _ = reply.send(self.manager.update_item(handle));
            }
            Command::UnregisterItem { handle, reply } => {
                let _ = reply.send(self.manager.unregister_item(handle));
            }
            Command::Refresh { reply } => {
                self.manager.queue_state_update(Some(Box::new(move || {
                    let _ = reply.send(());
                })));
            }
            Command::AllowAdvertising { allowed } => self.manager.allow_advertising(allowed),
            Command::EnableConnectable { allowed } => self.manager.enable_connectable(allowed),
            Command::RefreshDirected => self.manager.refresh_directed_advertising(),
            Command::RegisterDefaults { table, reply } => {
                let _ = reply.send(self.manager.register_default_parameters(table));
            }
            Command::SelectPreset { index, reply } => {
                let _ = reply.send(self.manager.select_default_preset(index));
            }
            Command::Diagnostics { reply } => {
                let _ = reply.send(self.manager.diagnostics());
            }
            Command::Layouts { reply } => {
                let _ = reply.send(self.manager.set_layouts());
            }
            Command::DisableSet { id, reply } => {
                let _ = reply.send(self.manager.disable_set(id));
            }
            Command::Shutdown => {
                info!("Shutdown requested");
                self.running = false;
            }
        }
    }

    fn handle_timer(&mut self, timer: TimerId, generation: u64) {
        let armed = self.timers.get(&timer).map(|(armed, _)| *armed);
        if armed != Some(generation) {
            trace!(?timer, "Dropping stale timer expiry");
            return;
        }
        self.timers.remove(&timer);
        debug!(?timer, "Timer expired");
        self.manager.handle_timer(timer);
    }

    async fn flush_effects(&mut self) -> RuntimeResult<()> {
        for effect in self.manager.take_effects() {
            match effect {
                Effect::Controller(command) => {
                    debug!(command = command.name(), adv_handle = %command.handle(), "Submitting");
                    self.controller.submit(command).await?;
                }
                Effect::StartTimer { timer, after } => self.arm(timer, after),
                Effect::CancelTimer { timer } => {
                    if let Some((_, handle)) = self.timers.remove(&timer) {
                        handle.abort();
                    }
                }
            }
        }
        Ok(())
    }

    fn arm(&mut self, timer: TimerId, after: std::time::Duration) {
        self.generation += 1;
        let generation = self.generation;
        let sender = self.timer_sender.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _ = sender.send((timer, generation));
        });
        if let Some((_, previous)) = self.timers.insert(timer, (generation, handle)) {
            previous.abort();
        }
        trace!(?timer, ?after, "Timer armed");
    }
}

impl Drop for AdvertisingRuntime {
    fn drop(&mut self) {
        for (_, (_, handle)) in self.timers.drain() {
            handle.abort();
        }
    }
}
