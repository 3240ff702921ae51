//! Customizer session controller
//!
//! Owns the base garment, shadow layer, displacement map, cropped design and
//! current frame for one session. Every mutation recomputes the frame at most
//! once; loads are matched against per-slot generations so a late response
//! can never overwrite a newer asset.

pub mod events;
pub mod loader;
pub mod options;

use std::sync::Arc;

use bytes::Bytes;
use futures::future;
use image::RgbaImage;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::domain::{BlendMode, Color, DesignPlacement};
use crate::engine::export::{self, ExportFormat};
use crate::engine::{
    acquire, build_displacement_map, AcquireError, CompositeFrame, CompositeInputs, ComposeError,
    Compositor, CropError, CropSession, CroppedDesign, DisplacementMap, ExportError,
};

pub use events::{
    AssetSlot, CustomizerEvent, CustomizerView, DesignState, Listener, ListenerId, PipelineState,
};
pub use loader::{CachingLoader, HttpImageLoader, ImageLoader, ImageSource, LoadError};
pub use options::{CustomizerOptions, OptionsError};

use events::Listeners;
use options::{validate_blur, validate_opacity, validate_strength};

/// Controller errors
#[derive(Debug, Error)]
pub enum CustomizerError {
    #[error("Failed to load {slot} image: {source}")]
    ImageLoad {
        slot: AssetSlot,
        #[source]
        source: LoadError,
    },
    #[error("Selected file is not a usable image: {0}")]
    UnsupportedFile(#[source] AcquireError),
    #[error("No crop in progress")]
    NoCropSession,
    #[error("No preview has been rendered yet")]
    NoFrame,
    #[error("Invalid options: {0}")]
    InvalidOptions(#[from] OptionsError),
    #[error("Crop failed: {0}")]
    Crop(#[from] CropError),
    #[error("Composite failed: {0}")]
    Compose(#[from] ComposeError),
    #[error("Export failed: {0}")]
    Export(#[from] ExportError),
}

/// Claim on the result of one asset load
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadTicket {
    slot: AssetSlot,
    generation: u64,
    source: ImageSource,
}

impl LoadTicket {
    pub fn slot(&self) -> AssetSlot {
        self.slot
    }

    pub fn source(&self) -> &ImageSource {
        &self.source
    }
}

/// What happened to a load result handed back to the controller
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// A newer load was requested; the result was dropped
    Stale,
    Failed,
}

/// One garment preview session
pub struct Customizer<L> {
    loader: L,
    options: CustomizerOptions,
    compositor: Compositor,

    base: Option<Arc<RgbaImage>>,
    shadow: Option<Arc<RgbaImage>>,
    map: Option<Arc<DisplacementMap>>,
    design: Option<Arc<CroppedDesign>>,
    crop: Option<CropSession>,
    frame: Option<Arc<CompositeFrame>>,
    revision: u64,

    pipeline: PipelineState,
    last_error: Option<Arc<CustomizerError>>,
    base_generation: u64,
    shadow_generation: u64,
    listeners: Listeners,
}

impl<L: ImageLoader> Customizer<L> {
    pub fn new(loader: L, options: CustomizerOptions) -> Result<Self, CustomizerError> {
        options.validate()?;

        Ok(Customizer {
            loader,
            options,
            compositor: Compositor::new(),
            base: None,
            shadow: None,
            map: None,
            design: None,
            crop: None,
            frame: None,
            revision: 0,
            pipeline: PipelineState::AwaitingMapBuild,
            last_error: None,
            base_generation: 0,
            shadow_generation: 0,
            listeners: Listeners::default(),
        })
    }

    pub fn with_compositor(mut self, compositor: Compositor) -> Self {
        self.compositor = compositor;
        self
    }

    pub fn options(&self) -> &CustomizerOptions {
        &self.options
    }

    pub fn pipeline_state(&self) -> PipelineState {
        self.pipeline
    }

    pub fn design_state(&self) -> DesignState {
        if self.crop.is_some() {
            DesignState::CropPending
        } else if self.design.is_some() {
            DesignState::DesignReady
        } else {
            DesignState::NoDesign
        }
    }

    /// Incremented once per rendered frame
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn frame(&self) -> Option<Arc<CompositeFrame>> {
        self.frame.clone()
    }

    pub fn displacement_map(&self) -> Option<&DisplacementMap> {
        self.map.as_deref()
    }

    pub fn last_error(&self) -> Option<&CustomizerError> {
        self.last_error.as_deref()
    }

    pub fn view(&self) -> CustomizerView<'_> {
        CustomizerView {
            frame: self.frame.as_deref(),
            revision: self.revision,
            design: self.design.as_deref(),
            crop: self.crop.as_ref(),
            pipeline: self.pipeline,
            design_state: self.design_state(),
            error: self.last_error.as_deref(),
        }
    }

    pub fn subscribe(&mut self, listener: Listener) -> ListenerId {
        self.listeners.add(listener)
    }

    /// Returns false if the listener was already gone
    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    // Asset loading

    /// Start a base image load; the result must go through [`apply_base`](Self::apply_base)
    pub fn request_base(&mut self) -> Result<LoadTicket, CustomizerError> {
        let source = ImageSource::parse(&self.options.base_source).map_err(|source| {
            CustomizerError::ImageLoad {
                slot: AssetSlot::Base,
                source,
            }
        })?;

        self.base_generation += 1;
        self.pipeline = PipelineState::AwaitingMapBuild;

        debug!(source = %source, generation = self.base_generation, "Base load requested");

        Ok(LoadTicket {
            slot: AssetSlot::Base,
            generation: self.base_generation,
            source,
        })
    }

    /// Switch to a new base garment
    pub fn set_base_source(&mut self, source: impl Into<String>) -> Result<LoadTicket, CustomizerError> {
        let source = source.into();
        if source.trim().is_empty() {
            return Err(OptionsError::MissingBaseSource.into());
        }
        self.options.base_source = source;
        self.request_base()
    }

    /// Start a shadow load, or `None` when no shadow is configured
    pub fn request_shadow(&mut self) -> Result<Option<LoadTicket>, CustomizerError> {
        let Some(raw) = self.options.shadow_source.as_deref() else {
            return Ok(None);
        };

        let source = ImageSource::parse(raw).map_err(|source| CustomizerError::ImageLoad {
            slot: AssetSlot::Shadow,
            source,
        })?;

        self.shadow_generation += 1;
        debug!(source = %source, generation = self.shadow_generation, "Shadow load requested");

        Ok(Some(LoadTicket {
            slot: AssetSlot::Shadow,
            generation: self.shadow_generation,
            source,
        }))
    }

    /// Replace or remove the shadow layer
    ///
    /// Removing it invalidates any in-flight shadow load and recomposes.
    pub fn set_shadow_source(&mut self, source: Option<String>) -> Result<Option<LoadTicket>, CustomizerError> {
        self.options.shadow_source = source.filter(|s| !s.trim().is_empty());

        if self.options.shadow_source.is_none() {
            self.shadow_generation += 1;
            if self.shadow.take().is_some() {
                self.render();
            }
            return Ok(None);
        }

        self.request_shadow()
    }

    /// Hand a base load result back to the controller
    pub fn apply_base(&mut self, ticket: LoadTicket, result: Result<Arc<RgbaImage>, LoadError>) -> ApplyOutcome {
        if !self.is_current(&ticket) {
            warn!(slot = %ticket.slot, generation = ticket.generation, "Discarding stale load");
            return ApplyOutcome::Stale;
        }

        let image = match result {
            Ok(image) => image,
            Err(source) => {
                warn!(source = %ticket.source, error = %source, "Base image failed to load");
                self.pipeline = PipelineState::Failed;
                self.report(CustomizerError::ImageLoad {
                    slot: AssetSlot::Base,
                    source,
                });
                return ApplyOutcome::Failed;
            }
        };

        let map = build_displacement_map(&image, self.options.displacement_blur, self.options.blur_kind);

        info!(
            source = %ticket.source,
            width = image.width(),
            height = image.height(),
            "Base image ready"
        );

        self.base = Some(image);
        self.map = Some(Arc::new(map));
        self.pipeline = PipelineState::Ready;
        if matches!(
            self.last_error.as_deref(),
            Some(CustomizerError::ImageLoad { slot: AssetSlot::Base, .. })
        ) {
            self.last_error = None;
        }
        self.render();

        ApplyOutcome::Applied
    }

    /// Hand a shadow load result back to the controller
    ///
    /// A failed shadow keeps the previous one; the preview stays usable.
    pub fn apply_shadow(&mut self, ticket: LoadTicket, result: Result<Arc<RgbaImage>, LoadError>) -> ApplyOutcome {
        if !self.is_current(&ticket) {
            warn!(slot = %ticket.slot, generation = ticket.generation, "Discarding stale load");
            return ApplyOutcome::Stale;
        }

        match result {
            Ok(image) => {
                debug!(source = %ticket.source, "Shadow image ready");
                self.shadow = Some(image);
                self.render();
                ApplyOutcome::Applied
            }
            Err(source) => {
                warn!(source = %ticket.source, error = %source, "Shadow image failed to load");
                self.report(CustomizerError::ImageLoad {
                    slot: AssetSlot::Shadow,
                    source,
                });
                ApplyOutcome::Failed
            }
        }
    }

    pub async fn load_base(&mut self) -> Result<ApplyOutcome, CustomizerError> {
        let ticket = self.request_base()?;
        let result = self.loader.load(&ticket.source).await;
        Ok(self.apply_base(ticket, result))
    }

    pub async fn load_shadow(&mut self) -> Result<Option<ApplyOutcome>, CustomizerError> {
        let Some(ticket) = self.request_shadow()? else {
            return Ok(None);
        };
        let result = self.loader.load(&ticket.source).await;
        Ok(Some(self.apply_shadow(ticket, result)))
    }

    /// Fetch base and shadow concurrently
    ///
    /// The shadow is applied first so a session that already has a base
    /// renders once for both.
    pub async fn load_assets(&mut self) -> Result<(ApplyOutcome, Option<ApplyOutcome>), CustomizerError> {
        let base_ticket = self.request_base()?;
        let shadow_ticket = self.request_shadow()?;

        let loader = &self.loader;
        let (base_result, shadow_result) = future::join(loader.load(&base_ticket.source), async {
            match &shadow_ticket {
                Some(ticket) => Some(loader.load(&ticket.source).await),
                None => None,
            }
        })
        .await;

        let shadow = match (shadow_ticket, shadow_result) {
            (Some(ticket), Some(result)) => Some(self.apply_shadow_quiet(ticket, result)),
            _ => None,
        };
        let base = self.apply_base(base_ticket, base_result);

        Ok((base, shadow))
    }

    fn apply_shadow_quiet(&mut self, ticket: LoadTicket, result: Result<Arc<RgbaImage>, LoadError>) -> ApplyOutcome {
        match result {
            Ok(image) if self.is_current(&ticket) => {
                self.shadow = Some(image);
                ApplyOutcome::Applied
            }
            result => self.apply_shadow(ticket, result),
        }
    }

    fn is_current(&self, ticket: &LoadTicket) -> bool {
        let current = match ticket.slot {
            AssetSlot::Base => self.base_generation,
            AssetSlot::Shadow => self.shadow_generation,
        };
        ticket.generation == current
    }

    // Option setters

    pub fn set_color(&mut self, color: Option<Color>) {
        self.options.color = color;
        self.render();
    }

    pub fn set_placement(&mut self, placement: DesignPlacement) -> Result<(), CustomizerError> {
        placement.validate().map_err(OptionsError::from)?;
        self.options.placement = placement;
        self.render();
        Ok(())
    }

    pub fn set_strength(&mut self, strength: f64) -> Result<(), CustomizerError> {
        validate_strength(strength)?;
        self.options.displacement_strength = strength;
        self.render();
        Ok(())
    }

    /// Change the map blur; rebuilds the map from the in-memory base
    pub fn set_blur_radius(&mut self, blur: f32) -> Result<(), CustomizerError> {
        validate_blur(blur)?;
        self.options.displacement_blur = blur;

        if let Some(base) = &self.base {
            self.map = Some(Arc::new(build_displacement_map(base, blur, self.options.blur_kind)));
        }
        self.render();
        Ok(())
    }

    pub fn set_design_blend(&mut self, mode: BlendMode) {
        self.options.design_blend = mode;
        self.render();
    }

    pub fn set_color_blend(&mut self, mode: BlendMode) {
        self.options.color_blend = mode;
        self.render();
    }

    pub fn set_opacity(&mut self, opacity: f32) -> Result<(), CustomizerError> {
        validate_opacity(opacity)?;
        self.options.opacity = opacity;
        self.render();
        Ok(())
    }

    // Design upload

    /// Ask the presentation layer to open its file picker
    pub fn trigger_upload(&mut self) {
        self.listeners.emit(&CustomizerEvent::UploadRequested);
    }

    /// Decode a picked file and open a crop over it
    ///
    /// On failure no crop is opened and the current design is untouched.
    pub fn select_file(&mut self, bytes: &[u8]) -> Result<(), CustomizerError> {
        let upload = acquire(bytes).map_err(CustomizerError::UnsupportedFile)?;

        let session = CropSession::open(
            upload,
            self.options.crop_aspect_ratio,
            self.options.crop_constraint,
        )?;

        debug!(region = ?session.region(), "Crop opened");

        self.crop = Some(session);
        self.listeners.emit(&CustomizerEvent::CropOpened);
        Ok(())
    }

    pub fn crop_session(&self) -> Option<&CropSession> {
        self.crop.as_ref()
    }

    pub fn crop_session_mut(&mut self) -> Option<&mut CropSession> {
        self.crop.as_mut()
    }

    /// Cut the framed region into the new design and recompose
    pub fn confirm_crop(&mut self) -> Result<(), CustomizerError> {
        let session = self.crop.take().ok_or(CustomizerError::NoCropSession)?;
        let design = session.crop();

        info!(
            width = design.dimensions().0,
            height = design.dimensions().1,
            "Design cropped"
        );

        self.design = Some(Arc::new(design));
        self.listeners.emit(&CustomizerEvent::CropClosed { confirmed: true });
        self.render();
        Ok(())
    }

    /// Close the crop without touching the current design
    pub fn cancel_crop(&mut self) -> bool {
        if self.crop.take().is_none() {
            return false;
        }
        self.listeners.emit(&CustomizerEvent::CropClosed { confirmed: false });
        true
    }

    pub fn clear_design(&mut self) {
        if self.design.take().is_some() {
            self.render();
        }
    }

    // Output

    pub fn export(&self, format: ExportFormat) -> Result<Bytes, CustomizerError> {
        let frame = self.frame.as_ref().ok_or(CustomizerError::NoFrame)?;
        let bytes = export::encode(frame.image(), format)?;

        info!(
            revision = self.revision,
            format = format.extension(),
            bytes = bytes.len(),
            "Preview exported"
        );

        Ok(bytes)
    }

    /// Current frame as a PNG `data:` URL
    pub fn export_data_url(&self) -> Result<String, CustomizerError> {
        let frame = self.frame.as_ref().ok_or(CustomizerError::NoFrame)?;
        Ok(export::to_data_url(frame.image(), ExportFormat::Png)?)
    }

    /// Drop every asset and listener and return to `Idle`
    ///
    /// In-flight loads become stale.
    pub fn teardown(&mut self) {
        self.base_generation += 1;
        self.shadow_generation += 1;
        self.base = None;
        self.shadow = None;
        self.map = None;
        self.design = None;
        self.crop = None;
        self.frame = None;
        self.last_error = None;
        self.pipeline = PipelineState::Idle;
        self.listeners.clear();

        debug!("Customizer torn down");
    }

    fn report(&mut self, error: CustomizerError) {
        let error = Arc::new(error);
        self.last_error = Some(error.clone());
        self.listeners.emit(&CustomizerEvent::Error(error));
    }

    /// Recompose from in-memory inputs; a no-op unless the pipeline is `Ready`
    fn render(&mut self) {
        if self.pipeline != PipelineState::Ready {
            return;
        }

        let result = match (&self.base, &self.map) {
            (Some(base), Some(map)) => self.compositor.compose(&CompositeInputs {
                base,
                displacement_map: map,
                design: self.design.as_deref().map(CroppedDesign::image),
                color: self.options.color,
                shadow: self.shadow.as_deref(),
                placement: self.options.placement,
                strength: self.options.displacement_strength,
                style: self.options.layer_style(),
            }),
            _ => return,
        };

        match result {
            Ok(frame) => {
                self.frame = Some(Arc::new(frame));
                self.revision += 1;
                self.listeners.emit(&CustomizerEvent::FrameRendered { revision: self.revision });
            }
            Err(e) => {
                warn!(error = %e, "Composite failed");
                self.report(e.into());
            }
        }
    }
}
