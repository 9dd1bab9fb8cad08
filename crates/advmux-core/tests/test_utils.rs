//! Test utilities for deterministic scheduler testing
//!
//! [`TestBench`] plays the part of the controller and the timer host: it
//! collects the effects produced by an [`AdvertisingManager`], answers every
//! controller command in order and fires virtual timers on request. Nothing
//! here sleeps; a test decides exactly when each confirmation arrives.

#![allow(dead_code)]

use std::borrow::Cow;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use advmux_core::{
    AdvHandle, AdvType, AdvertisingEvent, AdvertisingItem, AdvertisingManager, BdAddr, ControllerCommand,
    ControllerEvent, Effect, EventLog, HciStatus, ItemInfo, ItemParams, ManagerConfig, StaticItem,
    TimerId,
};

// ----------------------------------------------------------------------------
// Test Bench
// ----------------------------------------------------------------------------

pub struct TestBench {
    pub manager: AdvertisingManager,
    /// Every controller command issued so far, in order
    pub sent: Vec<ControllerCommand>,
    pending: VecDeque<ControllerCommand>,
    timers: HashMap<TimerId, Duration>,
    /// Every timer ever started, in order
    pub armed_history: Vec<(TimerId, Duration)>,
    injected: VecDeque<(&'static str, HciStatus)>,
    address_counter: u8,
    /// Commands issued for a handle that already had one outstanding
    pub overlaps: usize,
}

impl TestBench {
    pub fn new(config: ManagerConfig) -> Self {
        Self {
            manager: AdvertisingManager::new(config),
            sent: Vec::new(),
            pending: VecDeque::new(),
            timers: HashMap::new(),
            armed_history: Vec::new(),
            injected: VecDeque::new(),
            address_counter: 0,
            overlaps: 0,
        }
    }

    pub fn with_testing_config() -> Self {
        Self::new(ManagerConfig::testing())
    }

    /// Pull effects out of the manager into the bench queues
    pub fn collect(&mut self) {
        for effect in self.manager.take_effects() {
            match effect {
                Effect::Controller(command) => {
                    if self
                        .pending
                        .iter()
                        .any(|outstanding| outstanding.handle() == command.handle())
                    {
                        self.overlaps += 1;
                    }
                    self.sent.push(command.clone());
                    self.pending.push_back(command);
                }
                Effect::StartTimer { timer, after } => {
                    self.timers.insert(timer, after);
                    self.armed_history.push((timer, after));
                }
                Effect::CancelTimer { timer } => {
                    self.timers.remove(&timer);
                }
            }
        }
    }

    /// Answer the oldest outstanding command; false if none was outstanding
    pub fn step(&mut self) -> bool {
        self.collect();
        let Some(command) = self.pending.pop_front() else {
            return false;
        };
        let status = self.status_for(&command);
        let resolved = self.next_address();
        self.manager
            .handle_controller_event(ControllerEvent::answering(&command, status, resolved));
        self.collect();
        true
    }

    /// Answer commands until the controller is quiet
    pub fn settle(&mut self) {
        for _ in 0..10_000 {
            if self.step() {
                continue;
            }
            if self.manager.is_refreshing() && self.timers.contains_key(&TimerId::RefreshRecheck) {
                self.fire(TimerId::RefreshRecheck);
                continue;
            }
            return;
        }
        panic!("scheduler did not settle");
    }

    pub fn fire(&mut self, timer: TimerId) {
        self.timers.remove(&timer);
        self.manager.handle_timer(timer);
        self.collect();
    }

    pub fn armed(&self, timer: TimerId) -> Option<Duration> {
        self.timers.get(&timer).copied()
    }

    pub fn pending(&self) -> &VecDeque<ControllerCommand> {
        &self.pending
    }

    /// Answer the next command named `name` with `status`
    pub fn inject(&mut self, name: &'static str, status: HciStatus) {
        self.injected.push_back((name, status));
    }

    pub fn terminate(&mut self, handle: AdvHandle) {
        self.manager
            .handle_controller_event(ControllerEvent::Terminated { handle, reason: 0x3C });
        self.collect();
    }

    /// Names of the commands sent since `mark`
    pub fn names_since(&self, mark: usize) -> Vec<&'static str> {
        self.sent[mark..].iter().map(|command| command.name()).collect()
    }

    pub fn count(&self, name: &str) -> usize {
        self.sent.iter().filter(|command| command.name() == name).count()
    }

    /// Bytes of every advertising payload sent, in order
    pub fn advertising_payloads(&self) -> Vec<Vec<u8>> {
        self.sent
            .iter()
            .filter_map(|command| match command {
                ControllerCommand::SetAdvertisingData { payload, .. } => Some(payload.to_bytes()),
                _ => None,
            })
            .collect()
    }

    pub fn scan_response_payloads(&self) -> Vec<Vec<u8>> {
        self.sent
            .iter()
            .filter_map(|command| match command {
                ControllerCommand::SetScanResponseData { payload, .. } => Some(payload.to_bytes()),
                _ => None,
            })
            .collect()
    }

    fn status_for(&mut self, command: &ControllerCommand) -> HciStatus {
        let index = self
            .injected
            .iter()
            .position(|(name, _)| *name == command.name());
        match index.and_then(|index| self.injected.remove(index)) {
            Some((_, status)) => status,
            None => HciStatus::Success,
        }
    }

    fn next_address(&mut self) -> BdAddr {
        self.address_counter = self.address_counter.wrapping_add(1);
        BdAddr::new([0x40, 0x00, 0x00, 0x00, 0x00, self.address_counter])
    }
}

// ----------------------------------------------------------------------------
// Item Helpers
// ----------------------------------------------------------------------------

pub fn create_event_log() -> EventLog {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn events(log: &EventLog) -> Vec<AdvertisingEvent> {
    log.lock().map(|events| events.clone()).unwrap_or_default()
}

/// Item of `size` octets made of one manufacturer-specific element
pub fn create_test_item(adv_type: AdvType, size: usize) -> StaticItem {
    create_test_item_with(ItemInfo::advert(adv_type, size), size)
}

pub fn create_test_item_with(info: ItemInfo, size: usize) -> StaticItem {
    let mut data = Vec::with_capacity(size);
    if size >= 2 {
        data.push((size - 1) as u8);
        data.push(0xFF);
        data.extend(std::iter::repeat(size as u8).take(size - 2));
    } else {
        data.extend(std::iter::repeat(0).take(size));
    }
    StaticItem::new(ItemInfo { data_size: size, ..info }, data)
}

/// Item whose content the test keeps a handle to after registration
///
/// `declared` pins the size reported in `info()`; without it the size follows
/// the content.
pub struct SharedItem {
    pub info: ItemInfo,
    pub content: Arc<Mutex<Vec<u8>>>,
    pub declared: Option<usize>,
}

impl SharedItem {
    pub fn new(info: ItemInfo) -> (Self, Arc<Mutex<Vec<u8>>>) {
        let content = Arc::new(Mutex::new(Vec::new()));
        let item = Self {
            info,
            content: Arc::clone(&content),
            declared: None,
        };
        (item, content)
    }

    pub fn declaring(mut self, size: usize) -> Self {
        self.declared = Some(size);
        self
    }
}

impl AdvertisingItem for SharedItem {
    fn info(&self) -> ItemInfo {
        let actual = self.content.lock().map(|data| data.len()).unwrap_or(0);
        ItemInfo {
            data_size: self.declared.unwrap_or(actual),
            ..self.info
        }
    }

    fn data(&self) -> Option<Cow<'_, [u8]>> {
        let data = self.content.lock().ok()?.clone();
        if data.is_empty() {
            None
        } else {
            Some(Cow::Owned(data))
        }
    }
}

pub fn create_rotating_params(min_secs: u32, max_secs: u32) -> ItemParams {
    ItemParams::default()
        .with_random_address(advmux_core::LocalAddressKind::GenerateResolvable, None)
        .with_rotation(min_secs, max_secs)
}

/// Item whose `ItemInfo` the test can change after registration
pub struct ReshapingItem {
    info: Arc<Mutex<ItemInfo>>,
    data: Vec<u8>,
}

impl ReshapingItem {
    pub fn new(adv_type: AdvType, size: usize) -> (Self, Arc<Mutex<ItemInfo>>) {
        let shape = create_test_item(adv_type, size);
        let info = Arc::new(Mutex::new(shape.info()));
        let data = shape.data().map(|data| data.into_owned()).unwrap_or_default();
        let item = Self {
            info: Arc::clone(&info),
            data,
        };
        (item, info)
    }
}

impl AdvertisingItem for ReshapingItem {
    fn info(&self) -> ItemInfo {
        *self.info.lock().unwrap()
    }

    fn data(&self) -> Option<Cow<'_, [u8]>> {
        Some(Cow::Borrowed(&self.data))
    }
}
