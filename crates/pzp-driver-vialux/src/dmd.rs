//! Vialux DMDs through the ALP-4 API.
//!
//! The basic Piece shows one binary image from a single-frame sequence. The
//! advanced Piece adds frame timing, slave mode and a long sequence that can
//! be uploaded and run as a whole.

use async_trait::async_trait;
use ndarray::{Array2, Array3};
use parking_lot::Mutex;
use pzp_core::action::arg;
use pzp_core::preview::{ImagePreview, PreviewSettings};
use pzp_core::sdk::{run_blocking, SdkLoader};
use pzp_core::{
    param, Action, ActionSet, Parameter, ParameterSet, Piece, PieceError, PieceResult,
    PuzzleContext,
};
use serde_json::Value;
use std::sync::Arc;

/// ALP API version the Piece asks for.
pub const ALP_VERSION: &str = "4.3";

/// Mirror count assumed until a device reports its own.
pub const DEFAULT_SIZE: (usize, usize) = (1280, 800);

/// ALP sequence id.
pub type SequenceId = u32;

/// `ALP_PROJ_MODE` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectionMode {
    /// `ALP_MASTER`: frames are timed internally.
    Master,
    /// `ALP_SLAVE`: frames follow the external trigger.
    Slave,
}

/// `ALP_TRIGGER_EDGE` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerEdge {
    /// `ALP_EDGE_RISING`
    Rising,
    /// `ALP_EDGE_FALLING`
    Falling,
}

/// The ALP library.
pub trait AlpLibrary: Send + Sync {
    /// Load the API of `version` and initialise the first device.
    fn initialize(&self, version: &str) -> PieceResult<Arc<dyn AlpDevice>>;
}

/// An initialised DMD.
pub trait AlpDevice: Send + Sync {
    /// `(nSizeX, nSizeY)`.
    fn size(&self) -> (usize, usize);

    /// `SeqAlloc`.
    fn seq_alloc(&self, images: u32, bit_depth: u32) -> PieceResult<SequenceId>;

    /// `FreeSeq`.
    fn free_seq(&self, sequence: SequenceId) -> PieceResult<()>;

    /// `SeqPut` with raveled row-major image data.
    fn seq_put(&self, sequence: SequenceId, data: &[u8]) -> PieceResult<()>;

    /// `SetTiming` with an illumination time in µs.
    fn set_timing(&self, sequence: SequenceId, illumination_us: i64) -> PieceResult<()>;

    /// `Run`.
    fn run(&self, sequence: SequenceId, looping: bool) -> PieceResult<()>;

    /// `Halt`.
    fn halt(&self) -> PieceResult<()>;

    /// `ProjControl(ALP_PROJ_MODE, mode)`.
    fn set_projection_mode(&self, mode: ProjectionMode) -> PieceResult<()>;

    /// `DevControl(ALP_TRIGGER_EDGE, edge)`.
    fn set_trigger_edge(&self, edge: TriggerEdge) -> PieceResult<()>;

    /// `Free`.
    fn free(&self) -> PieceResult<()>;
}

/// Shared library handle.
pub type SharedAlp = Arc<dyn AlpLibrary>;

/// Which controls the Piece offers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DmdMode {
    /// Single image only.
    #[default]
    Basic,
    /// Timing, slave mode and image sequences.
    Advanced,
}

struct Device {
    dmd: Arc<dyn AlpDevice>,
    seq: SequenceId,
    long_seq: Option<SequenceId>,
}

struct State {
    library: Option<SharedAlp>,
    device: Option<Device>,
    size: (usize, usize),
}

/// Advanced-mode parameters.
#[derive(Clone)]
struct Sequence {
    illumination_time: Parameter<i64>,
    slave: Parameter<bool>,
    n_images: Parameter<i64>,
    image_sequence: Parameter<Array3<u8>>,
    preview_i: Parameter<i64>,
}

#[derive(Clone)]
struct Parts {
    ctx: PuzzleContext,
    loader: SdkLoader<SharedAlp>,
    state: Arc<Mutex<State>>,
    image: Parameter<Array2<u8>>,
}

impl Parts {
    fn debug(&self) -> bool {
        self.ctx.debug()
    }

    fn library(&self) -> PieceResult<SharedAlp> {
        let loaded = self.state.lock().library.clone();
        match loaded {
            Some(library) => Ok(library),
            None => {
                let library = (self.loader)()?;
                self.state.lock().library = Some(library.clone());
                Ok(library)
            }
        }
    }

    fn ensure(&self) -> PieceResult<()> {
        if self.debug() || self.state.lock().device.is_some() {
            return Ok(());
        }
        Err(PieceError::not_connected("DMD not connected"))
    }

    fn ensure_seq(&self) -> PieceResult<()> {
        if self.debug() {
            return Ok(());
        }
        match &self.state.lock().device {
            Some(Device {
                long_seq: Some(_), ..
            }) => Ok(()),
            _ => Err(PieceError::Precondition(
                "Please set the n_images param.".into(),
            )),
        }
    }

    fn device(&self) -> PieceResult<(Arc<dyn AlpDevice>, SequenceId, Option<SequenceId>)> {
        self.state
            .lock()
            .device
            .as_ref()
            .map(|d| (d.dmd.clone(), d.seq, d.long_seq))
            .ok_or_else(|| PieceError::not_connected("DMD not connected"))
    }

    /// `(size_y, size_x)`, the shape of one image.
    fn shape(&self) -> (usize, usize) {
        let (x, y) = self.state.lock().size;
        (y, x)
    }

    async fn connect(&self) -> PieceResult<()> {
        if !self.debug() {
            let library = self.library()?;
            let dmd = run_blocking(move || library.initialize(ALP_VERSION)).await?;
            let size = dmd.size();
            let seq = dmd.seq_alloc(1, 1)?;
            let mut state = self.state.lock();
            state.size = size;
            state.device = Some(Device {
                dmd,
                seq,
                long_seq: None,
            });
            tracing::info!(width = size.0, height = size.1, "DMD initialised");
        }
        self.black().await
    }

    async fn disconnect(&self) -> PieceResult<()> {
        if self.debug() {
            return Ok(());
        }
        let device = self.state.lock().device.take();
        if let Some(device) = device {
            device.dmd.halt()?;
            if let Some(long_seq) = device.long_seq {
                device.dmd.free_seq(long_seq)?;
            }
            device.dmd.free_seq(device.seq)?;
            device.dmd.free()?;
            tracing::info!("DMD freed");
        }
        Ok(())
    }

    async fn show(&self, image: Array2<u8>) -> PieceResult<Option<Array2<u8>>> {
        self.ensure()?;
        if self.debug() {
            return Ok(Some(image));
        }
        if image.dim() != self.shape() {
            return Err(PieceError::validation(
                "image",
                format!("shape {:?} does not match the DMD's {:?}", image.dim(), self.shape()),
            ));
        }
        let (dmd, seq, _) = self.device()?;
        let data: Vec<u8> = image.iter().copied().collect();
        run_blocking(move || {
            dmd.halt()?;
            dmd.seq_put(seq, &data)?;
            dmd.run(seq, true)
        })
        .await?;
        Ok(Some(image))
    }

    async fn fill(&self, level: u8) -> PieceResult<()> {
        self.image.set(Array2::from_elem(self.shape(), level)).await?;
        Ok(())
    }

    async fn black(&self) -> PieceResult<()> {
        self.fill(0).await
    }

    async fn white(&self) -> PieceResult<()> {
        self.fill(255).await
    }

    async fn halt(&self) -> PieceResult<()> {
        self.ensure()?;
        if self.debug() {
            return Ok(());
        }
        self.device()?.0.halt()
    }
}

impl Sequence {
    fn new() -> Self {
        Self {
            illumination_time: param::spinbox("illumination_time", 10_000i64)
                .with_min(0)
                .with_step(1000)
                .with_unit("us")
                .with_group("Settings"),
            slave: param::checkbox("slave", false).with_group("Settings"),
            n_images: param::spinbox("n_images", 1i64).with_min(1).with_group("Sequence"),
            image_sequence: param::array("image_sequence", Array3::zeros((0, 0, 0)))
                .with_group("Sequence"),
            preview_i: param::spinbox("preview_i", 0i64)
                .with_min(0)
                .with_max(0)
                .with_step(1)
                .with_group("Sequence"),
        }
    }

    fn wire(&self, parts: &Parts) {
        let p = parts.clone();
        self.illumination_time.set_setter(move |us: i64| {
            let p = p.clone();
            async move {
                p.ensure()?;
                p.ensure_seq()?;
                if !p.debug() {
                    let (dmd, seq, long_seq) = p.device()?;
                    dmd.set_timing(seq, us)?;
                    if let Some(long_seq) = long_seq {
                        dmd.set_timing(long_seq, us)?;
                    }
                }
                Ok(Some(us))
            }
        });

        let p = parts.clone();
        self.slave.set_setter(move |slave: bool| {
            let p = p.clone();
            async move {
                p.ensure()?;
                if p.debug() {
                    return Ok(Some(slave));
                }
                let dmd = p.device()?.0;
                if slave {
                    dmd.set_projection_mode(ProjectionMode::Slave)?;
                    dmd.set_trigger_edge(TriggerEdge::Rising)?;
                } else {
                    dmd.set_projection_mode(ProjectionMode::Master)?;
                }
                Ok(Some(slave))
            }
        });

        let (p, s) = (parts.clone(), self.clone());
        self.n_images.set_setter(move |n: i64| {
            let (p, s) = (p.clone(), s.clone());
            async move {
                p.ensure()?;
                s.preview_i.set_max(n - 1);
                if p.debug() {
                    return Ok(Some(n));
                }
                let images = u32::try_from(n)
                    .map_err(|_| PieceError::validation("n_images", "must fit in u32"))?;
                let (dmd, _, previous) = p.device()?;
                if let Some(previous) = previous {
                    dmd.free_seq(previous)?;
                }
                let long_seq = dmd.seq_alloc(images, 1)?;
                if let Some(device) = p.state.lock().device.as_mut() {
                    device.long_seq = Some(long_seq);
                }
                tracing::debug!(n, long_seq, "sequence allocated");
                s.illumination_time.reapply().await?;
                Ok(Some(n))
            }
        });

        let (p, s) = (parts.clone(), self.clone());
        self.image_sequence.set_setter(move |images: Array3<u8>| {
            let (p, s) = (p.clone(), s.clone());
            async move {
                p.ensure()?;
                p.ensure_seq()?;
                if p.debug() {
                    return Ok(Some(images));
                }
                let (rows, cols) = p.shape();
                let expected = (usize::try_from(s.n_images.value()).unwrap_or(0), rows, cols);
                if images.dim() != expected {
                    return Err(PieceError::validation(
                        "image_sequence",
                        format!("shape {:?} does not match {:?}", images.dim(), expected),
                    ));
                }
                let (dmd, _, long_seq) = p.device()?;
                let long_seq = long_seq.ok_or_else(|| {
                    PieceError::Precondition("Please set the n_images param.".into())
                })?;
                let data: Vec<u8> = images.iter().copied().collect();
                run_blocking(move || dmd.seq_put(long_seq, &data)).await?;
                Ok(Some(images))
            }
        });
    }

    fn register(&self, params: &mut ParameterSet) {
        params.register(self.illumination_time.clone());
        params.register(self.slave.clone());
        params.register(self.n_images.clone());
        params.register(self.image_sequence.clone());
        params.register(self.preview_i.clone());
    }

    fn register_actions(&self, parts: &Parts, actions: &mut ActionSet) {
        let p = parts.clone();
        actions.register(Action::new("Halt", move |_| {
            let p = p.clone();
            async move {
                p.halt().await?;
                Ok(Value::Null)
            }
        }));

        let p = parts.clone();
        actions.register(Action::new("Run Sequence", move |args| {
            let p = p.clone();
            async move {
                p.ensure()?;
                p.ensure_seq()?;
                let looping: bool = arg(&args, "loop")?.unwrap_or(false);
                if p.debug() {
                    return Ok(Value::Null);
                }
                let (dmd, _, long_seq) = p.device()?;
                if let Some(long_seq) = long_seq {
                    dmd.run(long_seq, looping)?;
                }
                Ok(Value::Null)
            }
        }));
    }
}

/// Vialux DMD Piece.
pub struct Dmd {
    mode: DmdMode,
    parts: Parts,
    connected: Parameter<bool>,
    sequence: Option<Sequence>,
    preview: ImagePreview,
    params: ParameterSet,
    actions: ActionSet,
}

impl Dmd {
    /// Build the Piece.
    pub fn new(ctx: PuzzleContext, loader: SdkLoader<SharedAlp>, mode: DmdMode) -> Self {
        let parts = Parts {
            ctx,
            loader,
            state: Arc::new(Mutex::new(State {
                library: None,
                device: None,
                size: DEFAULT_SIZE,
            })),
            image: param::array("image", Array2::zeros((0, 0))),
        };

        let connected = param::connected();
        let (open, close) = (parts.clone(), parts.clone());
        param::wire_connection(
            &connected,
            move || {
                let p = open.clone();
                async move { p.connect().await }
            },
            move || {
                let p = close.clone();
                async move { p.disconnect().await }
            },
        );

        let p = parts.clone();
        parts.image.set_setter(move |image| {
            let p = p.clone();
            async move { p.show(image).await }
        });

        let mut params = ParameterSet::new();
        params.register(connected.clone());
        params.register(parts.image.clone());

        let mut actions = ActionSet::new();
        let p = parts.clone();
        actions.register(Action::new("White", move |_| {
            let p = p.clone();
            async move {
                p.white().await?;
                Ok(Value::Null)
            }
        }));
        let p = parts.clone();
        actions.register(Action::new("Black", move |_| {
            let p = p.clone();
            async move {
                p.black().await?;
                Ok(Value::Null)
            }
        }));
        let p = parts.clone();
        actions.register(
            Action::new("Display", move |_| {
                let p = p.clone();
                async move {
                    p.image.reapply().await?;
                    Ok(Value::Null)
                }
            })
            .hidden(),
        );

        let sequence = (mode == DmdMode::Advanced).then(|| {
            let sequence = Sequence::new();
            sequence.wire(&parts);
            sequence.register(&mut params);
            sequence.register_actions(&parts, &mut actions);
            sequence
        });

        let preview = ImagePreview::new(PreviewSettings::default());
        preview.register(&mut params);

        Self {
            mode,
            parts,
            connected,
            sequence,
            preview,
            params,
            actions,
        }
    }

    /// `connected` checkbox.
    pub fn connected(&self) -> &Parameter<bool> {
        &self.connected
    }

    /// `image` array, `size_y` × `size_x`.
    pub fn image(&self) -> &Parameter<Array2<u8>> {
        &self.parts.image
    }

    /// Mirror counts as `(size_x, size_y)`.
    pub fn size(&self) -> (usize, usize) {
        self.parts.state.lock().size
    }

    /// Preview state.
    pub fn preview(&self) -> &ImagePreview {
        &self.preview
    }

    /// `illumination_time` in µs (advanced mode).
    pub fn illumination_time(&self) -> Option<&Parameter<i64>> {
        self.sequence.as_ref().map(|s| &s.illumination_time)
    }

    /// `slave` checkbox (advanced mode).
    pub fn slave(&self) -> Option<&Parameter<bool>> {
        self.sequence.as_ref().map(|s| &s.slave)
    }

    /// `n_images` spinbox (advanced mode).
    pub fn n_images(&self) -> Option<&Parameter<i64>> {
        self.sequence.as_ref().map(|s| &s.n_images)
    }

    /// `image_sequence` array, images × `size_y` × `size_x` (advanced mode).
    pub fn image_sequence(&self) -> Option<&Parameter<Array3<u8>>> {
        self.sequence.as_ref().map(|s| &s.image_sequence)
    }

    /// `preview_i` spinbox (advanced mode).
    pub fn preview_i(&self) -> Option<&Parameter<i64>> {
        self.sequence.as_ref().map(|s| &s.preview_i)
    }
}

#[async_trait]
impl Piece for Dmd {
    fn kind(&self) -> &'static str {
        match self.mode {
            DmdMode::Basic => "vialux.dmd",
            DmdMode::Advanced => "vialux.dmd_advanced",
        }
    }

    fn params(&self) -> &ParameterSet {
        &self.params
    }

    fn actions(&self) -> &ActionSet {
        &self.actions
    }

    async fn setup(&self) -> PieceResult<()> {
        self.parts.library().map(|_| ())
    }

    async fn handle_close(&self) -> PieceResult<()> {
        self.parts.disconnect().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pzp_core::sdk;

    fn debug_dmd(mode: DmdMode) -> Dmd {
        Dmd::new(PuzzleContext::new(true), sdk::unavailable("ALP-4", None), mode)
    }

    #[tokio::test]
    async fn test_debug_connect_shows_black() {
        let dmd = debug_dmd(DmdMode::Basic);
        dmd.connected().set(true).await.unwrap();
        let image = dmd.image().value();
        assert_eq!(image.dim(), (800, 1280));
        assert!(image.iter().all(|v| *v == 0));

        dmd.actions().run("White", Value::Null).await.unwrap();
        assert!(dmd.image().value().iter().all(|v| *v == 255));
    }

    #[test]
    fn test_modes() {
        let basic = debug_dmd(DmdMode::Basic);
        assert_eq!(basic.params().names(), vec!["connected", "image"]);
        assert_eq!(basic.actions().names(), vec!["White", "Black", "Display"]);
        assert!(!basic.actions().get("Display").unwrap().is_visible());
        assert!(basic.n_images().is_none());

        let advanced = debug_dmd(DmdMode::Advanced);
        assert_eq!(
            advanced.params().names(),
            vec![
                "connected",
                "image",
                "illumination_time",
                "slave",
                "n_images",
                "image_sequence",
                "preview_i"
            ]
        );
        assert_eq!(
            advanced.actions().names(),
            vec!["White", "Black", "Display", "Halt", "Run Sequence"]
        );
        assert_eq!(advanced.kind(), "vialux.dmd_advanced");
    }

    #[tokio::test]
    async fn test_n_images_bounds_preview_index() {
        let dmd = debug_dmd(DmdMode::Advanced);
        dmd.n_images().unwrap().set(5).await.unwrap();
        assert_eq!(dmd.preview_i().unwrap().metadata().max_value, Some(4.0));
        assert!(dmd.preview_i().unwrap().set(4).await.is_ok());
        assert!(dmd.preview_i().unwrap().set(5).await.is_err());
        assert!(dmd.n_images().unwrap().set(0).await.is_err());
    }

    #[tokio::test]
    async fn test_not_connected() {
        let dmd = Dmd::new(
            PuzzleContext::new(false),
            sdk::unavailable("ALP-4", None),
            DmdMode::Advanced,
        );
        let err = dmd.actions().run("White", Value::Null).await.unwrap_err();
        assert_eq!(err.to_string(), "DMD not connected");
        let err = dmd.actions().run("Halt", Value::Null).await.unwrap_err();
        assert_eq!(err.to_string(), "DMD not connected");
    }
}
