//! Map-completion bridge.
//!
//! GPU backends signal buffer-map completion through one of two callback shapes. The bridge
//! builds the shape the active device expects and funnels both into a single [`MapCompletion`]
//! record per in-flight map: a raw status code plus an atomic "complete" flag written with
//! release ordering and read with acquire ordering. Callbacks may run inside
//! `process_events` or from a backend-internal context, so the flag is the only contract the
//! poll loop relies on.

use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use crate::foundation::core::FrameNumber;

/// Opaque callback payload, the safe counterpart of a `void*` userdata slot.
pub type Userdata = Arc<dyn Any + Send + Sync>;

/// Which callback shape a device uses for asynchronous buffer maps.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MapConvention {
    /// Callback-info descriptor: `(status, message, userdata1, userdata2)` plus a calling mode.
    Descriptor,
    /// Bare function pointer: `(status, userdata)`.
    Bare,
}

impl MapConvention {
    /// Raw status value this convention uses for success.
    pub fn success_code(self) -> u32 {
        match self {
            Self::Descriptor => MapAsyncStatus::Success as u32,
            Self::Bare => BufferMapAsyncStatus::Success as u32,
        }
    }

    pub fn is_success(self, status: u32) -> bool {
        status == self.success_code()
    }

    /// Human-readable name for a raw status in this convention.
    pub fn describe(self, status: u32) -> &'static str {
        match self {
            Self::Descriptor => MapAsyncStatus::from_raw(status).map_or("unknown", |s| s.name()),
            Self::Bare => BufferMapAsyncStatus::from_raw(status).map_or("unknown", |s| s.name()),
        }
    }
}

/// Status vocabulary of the descriptor convention. Success is `1`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum MapAsyncStatus {
    Success = 1,
    InstanceDropped = 2,
    Error = 3,
    Aborted = 4,
}

impl MapAsyncStatus {
    pub fn from_raw(raw: u32) -> Option<Self> {
        Some(match raw {
            1 => Self::Success,
            2 => Self::InstanceDropped,
            3 => Self::Error,
            4 => Self::Aborted,
            _ => return None,
        })
    }

    fn name(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::InstanceDropped => "instance dropped",
            Self::Error => "error",
            Self::Aborted => "aborted",
        }
    }
}

/// Status vocabulary of the bare convention. Success is `0`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum BufferMapAsyncStatus {
    Success = 0,
    ValidationError = 1,
    Unknown = 2,
    DeviceLost = 3,
    DestroyedBeforeCallback = 4,
    UnmappedBeforeCallback = 5,
    MappingAlreadyPending = 6,
    OffsetOutOfRange = 7,
    SizeOutOfRange = 8,
}

impl BufferMapAsyncStatus {
    pub fn from_raw(raw: u32) -> Option<Self> {
        Some(match raw {
            0 => Self::Success,
            1 => Self::ValidationError,
            2 => Self::Unknown,
            3 => Self::DeviceLost,
            4 => Self::DestroyedBeforeCallback,
            5 => Self::UnmappedBeforeCallback,
            6 => Self::MappingAlreadyPending,
            7 => Self::OffsetOutOfRange,
            8 => Self::SizeOutOfRange,
            _ => return None,
        })
    }

    fn name(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::ValidationError => "validation error",
            Self::Unknown => "unknown",
            Self::DeviceLost => "device lost",
            Self::DestroyedBeforeCallback => "destroyed before callback",
            Self::UnmappedBeforeCallback => "unmapped before callback",
            Self::MappingAlreadyPending => "mapping already pending",
            Self::OffsetOutOfRange => "offset out of range",
            Self::SizeOutOfRange => "size out of range",
        }
    }
}

/// When a descriptor-convention callback is allowed to fire.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallbackMode {
    WaitAnyOnly,
    AllowProcessEvents,
    AllowSpontaneous,
}

pub type DescriptorMapFn = fn(MapAsyncStatus, &str, Option<Userdata>, Option<Userdata>);

pub type BareMapFn = fn(BufferMapAsyncStatus, Option<Userdata>);

/// Descriptor-convention callback bundle.
pub struct MapCallbackInfo {
    pub mode: CallbackMode,
    pub callback: DescriptorMapFn,
    pub userdata1: Option<Userdata>,
    pub userdata2: Option<Userdata>,
}

impl MapCallbackInfo {
    pub fn invoke(self, status: MapAsyncStatus, message: &str) {
        (self.callback)(status, message, self.userdata1, self.userdata2);
    }
}

/// Bare-convention callback.
pub struct BareMapCallback {
    pub callback: BareMapFn,
    pub userdata: Option<Userdata>,
}

impl BareMapCallback {
    pub fn invoke(self, status: BufferMapAsyncStatus) {
        (self.callback)(status, self.userdata);
    }
}

/// A map callback in whichever shape the device speaks.
pub enum MapCallback {
    Descriptor(MapCallbackInfo),
    Bare(BareMapCallback),
}

impl MapCallback {
    pub fn convention(&self) -> MapConvention {
        match self {
            Self::Descriptor(_) => MapConvention::Descriptor,
            Self::Bare(_) => MapConvention::Bare,
        }
    }

    /// Deliver a `Result`-style outcome in the callback's own status vocabulary.
    ///
    /// Devices whose native API reports `Result<(), E>` use this instead of picking codes.
    pub fn complete(self, outcome: Result<(), String>) {
        match (self, outcome) {
            (Self::Descriptor(info), Ok(())) => info.invoke(MapAsyncStatus::Success, ""),
            (Self::Descriptor(info), Err(msg)) => info.invoke(MapAsyncStatus::Error, &msg),
            (Self::Bare(cb), Ok(())) => cb.invoke(BufferMapAsyncStatus::Success),
            (Self::Bare(cb), Err(msg)) => {
                tracing::debug!(detail = %msg, "buffer map failed");
                cb.invoke(BufferMapAsyncStatus::Unknown)
            }
        }
    }
}

/// Completion record of one asynchronous map.
#[derive(Debug, Default)]
pub struct MapCompletion {
    complete: AtomicBool,
    status: AtomicU32,
}

impl MapCompletion {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn signal(&self, status: u32) {
        self.status.store(status, Ordering::Relaxed);
        self.complete.store(true, Ordering::Release);
    }

    pub fn is_complete(&self) -> bool {
        self.complete.load(Ordering::Acquire)
    }

    /// Raw status once complete.
    pub fn status(&self) -> Option<u32> {
        self.is_complete().then(|| self.status.load(Ordering::Relaxed))
    }
}

/// Builds convention-specific callbacks that all resolve into a [`MapCompletion`].
#[derive(Clone, Copy, Debug)]
pub struct CompletionBridge {
    convention: MapConvention,
}

impl CompletionBridge {
    pub fn new(convention: MapConvention) -> Self {
        Self { convention }
    }

    pub fn convention(&self) -> MapConvention {
        self.convention
    }

    /// Callback that signals `completion` when the map for `frame` finishes.
    pub fn callback_for(&self, completion: &Arc<MapCompletion>, frame: FrameNumber) -> MapCallback {
        let record: Userdata = completion.clone();
        match self.convention {
            MapConvention::Descriptor => MapCallback::Descriptor(MapCallbackInfo {
                mode: CallbackMode::AllowProcessEvents,
                callback: on_descriptor_map,
                userdata1: Some(record),
                userdata2: Some(Arc::new(frame)),
            }),
            MapConvention::Bare => MapCallback::Bare(BareMapCallback {
                callback: on_bare_map,
                userdata: Some(record),
            }),
        }
    }

    /// `None` while pending, otherwise whether the map succeeded.
    pub fn outcome(&self, completion: &MapCompletion) -> Option<bool> {
        completion
            .status()
            .map(|status| self.convention.is_success(status))
    }
}

fn completion_of(userdata: Option<Userdata>) -> Option<Arc<MapCompletion>> {
    userdata?.downcast::<MapCompletion>().ok()
}

fn on_descriptor_map(
    status: MapAsyncStatus,
    message: &str,
    userdata1: Option<Userdata>,
    userdata2: Option<Userdata>,
) {
    let frame = userdata2.and_then(|u| u.downcast::<FrameNumber>().ok());
    if status != MapAsyncStatus::Success {
        tracing::debug!(?status, detail = message, ?frame, "map callback reported failure");
    }
    match completion_of(userdata1) {
        Some(completion) => completion.signal(status as u32),
        None => tracing::warn!(?frame, "map callback fired without a completion record"),
    }
}

fn on_bare_map(status: BufferMapAsyncStatus, userdata: Option<Userdata>) {
    if status != BufferMapAsyncStatus::Success {
        tracing::debug!(?status, "map callback reported failure");
    }
    match completion_of(userdata) {
        Some(completion) => completion.signal(status as u32),
        None => tracing::warn!("map callback fired without a completion record"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_codes_differ_between_conventions() {
        assert_eq!(MapConvention::Descriptor.success_code(), 1);
        assert_eq!(MapConvention::Bare.success_code(), 0);
        assert!(!MapConvention::Descriptor.is_success(0));
        assert!(!MapConvention::Bare.is_success(1));
    }

    #[test]
    fn descriptor_callback_signals_completion() {
        let bridge = CompletionBridge::new(MapConvention::Descriptor);
        let completion = MapCompletion::new();
        let cb = bridge.callback_for(&completion, FrameNumber(3));
        assert_eq!(cb.convention(), MapConvention::Descriptor);
        assert_eq!(bridge.outcome(&completion), None);

        let MapCallback::Descriptor(info) = cb else {
            panic!("expected descriptor callback");
        };
        assert_eq!(info.mode, CallbackMode::AllowProcessEvents);
        info.invoke(MapAsyncStatus::Success, "");

        assert!(completion.is_complete());
        assert_eq!(completion.status(), Some(1));
        assert_eq!(bridge.outcome(&completion), Some(true));
    }

    #[test]
    fn bare_callback_signals_completion() {
        let bridge = CompletionBridge::new(MapConvention::Bare);
        let completion = MapCompletion::new();
        let MapCallback::Bare(cb) = bridge.callback_for(&completion, FrameNumber(0)) else {
            panic!("expected bare callback");
        };
        cb.invoke(BufferMapAsyncStatus::Success);
        assert_eq!(completion.status(), Some(0));
        assert_eq!(bridge.outcome(&completion), Some(true));
    }

    #[test]
    fn failures_are_reported_per_convention() {
        for convention in [MapConvention::Descriptor, MapConvention::Bare] {
            let bridge = CompletionBridge::new(convention);
            let completion = MapCompletion::new();
            bridge
                .callback_for(&completion, FrameNumber(1))
                .complete(Err("device lost".to_string()));
            assert_eq!(bridge.outcome(&completion), Some(false), "{convention:?}");
        }
    }

    #[test]
    fn result_outcome_maps_to_success_code() {
        for convention in [MapConvention::Descriptor, MapConvention::Bare] {
            let bridge = CompletionBridge::new(convention);
            let completion = MapCompletion::new();
            bridge
                .callback_for(&completion, FrameNumber(1))
                .complete(Ok(()));
            assert_eq!(completion.status(), Some(convention.success_code()));
        }
    }

    #[test]
    fn completion_is_visible_across_threads() {
        let bridge = CompletionBridge::new(MapConvention::Bare);
        let completion = MapCompletion::new();
        let cb = bridge.callback_for(&completion, FrameNumber(9));
        std::thread::spawn(move || cb.complete(Ok(()))).join().unwrap();
        assert_eq!(bridge.outcome(&completion), Some(true));
    }

    #[test]
    fn status_names_are_convention_specific() {
        assert_eq!(MapConvention::Descriptor.describe(3), "error");
        assert_eq!(MapConvention::Bare.describe(3), "device lost");
        assert_eq!(MapConvention::Bare.describe(99), "unknown");
    }
}
