//! State published to the presentation layer

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::engine::{CompositeFrame, CropSession, CroppedDesign};
use super::CustomizerError;

/// Progress of the base image / displacement map pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    /// Torn down; no assets held
    Idle,
    /// Waiting for the base image so the map can be built
    AwaitingMapBuild,
    /// Base and map are in memory; composites run synchronously
    Ready,
    /// The last base load failed; see [`CustomizerView::error`]
    Failed,
}

/// Progress of the design upload flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DesignState {
    NoDesign,
    CropPending,
    DesignReady,
}

/// Which asset a load belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetSlot {
    Base,
    Shadow,
}

impl fmt::Display for AssetSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssetSlot::Base => f.write_str("base"),
            AssetSlot::Shadow => f.write_str("shadow"),
        }
    }
}

/// Notifications delivered to subscribed listeners
#[derive(Debug, Clone)]
pub enum CustomizerEvent {
    /// A new frame replaced the previous one
    FrameRendered { revision: u64 },
    /// The UI should open its file picker
    UploadRequested,
    CropOpened,
    CropClosed { confirmed: bool },
    Error(Arc<CustomizerError>),
}

/// Handle returned by `subscribe`, used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

pub type Listener = Box<dyn FnMut(&CustomizerEvent) + Send>;

/// Registered event listeners
#[derive(Default)]
pub(crate) struct Listeners {
    next_id: u64,
    entries: Vec<(ListenerId, Listener)>,
}

impl Listeners {
    pub(crate) fn add(&mut self, listener: Listener) -> ListenerId {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        self.entries.push((id, listener));
        id
    }

    pub(crate) fn remove(&mut self, id: ListenerId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(entry_id, _)| *entry_id != id);
        self.entries.len() != before
    }

    pub(crate) fn emit(&mut self, event: &CustomizerEvent) {
        for (_, listener) in self.entries.iter_mut() {
            listener(event);
        }
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Snapshot of everything a UI needs to draw the customizer
#[derive(Debug, Clone, Copy)]
pub struct CustomizerView<'a> {
    /// Latest frame, kept through later failures
    pub frame: Option<&'a CompositeFrame>,
    pub revision: u64,
    pub design: Option<&'a CroppedDesign>,
    /// Open crop modal, if any
    pub crop: Option<&'a CropSession>,
    pub pipeline: PipelineState,
    pub design_state: DesignState,
    pub error: Option<&'a CustomizerError>,
}

impl CustomizerView<'_> {
    pub fn is_crop_open(&self) -> bool {
        self.crop.is_some()
    }
}
