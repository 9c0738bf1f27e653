//! In-memory ALP-4 library.

use crate::dmd::{AlpDevice, AlpLibrary, ProjectionMode, SequenceId, TriggerEdge};
use parking_lot::Mutex;
use pzp_core::{PieceError, PieceResult};
use std::collections::BTreeMap;
use std::sync::Arc;

/// A recorded ALP call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlpCall {
    /// `AlpDevAlloc` with the requested API version
    Initialize(String),
    /// `SeqAlloc(images, bit_depth)` and the id handed out
    SeqAlloc(u32, u32, SequenceId),
    /// `FreeSeq(id)`
    FreeSeq(SequenceId),
    /// `SeqPut(id, bytes)` with the number of bytes
    SeqPut(SequenceId, usize),
    /// `SetTiming(id, illumination_us)`
    SetTiming(SequenceId, i64),
    /// `Run(id, loop)`
    Run(SequenceId, bool),
    /// `Halt`
    Halt,
    /// `ProjControl(ALP_PROJ_MODE, ..)`
    ProjectionMode(ProjectionMode),
    /// `DevControl(ALP_TRIGGER_EDGE, ..)`
    TriggerEdge(TriggerEdge),
    /// `Free`
    Free,
}

#[derive(Debug, Default)]
struct Shared {
    calls: Mutex<Vec<AlpCall>>,
    sequences: Mutex<BTreeMap<SequenceId, (u32, Vec<u8>)>>,
    next_id: Mutex<SequenceId>,
}

impl Shared {
    fn record(&self, call: AlpCall) {
        self.calls.lock().push(call);
    }
}

/// Simulated DMD.
#[derive(Debug)]
pub struct MockDevice {
    shared: Arc<Shared>,
    size: (usize, usize),
}

impl MockDevice {
    fn frame_len(&self) -> usize {
        self.size.0 * self.size.1
    }
}

impl AlpDevice for MockDevice {
    fn size(&self) -> (usize, usize) {
        self.size
    }

    fn seq_alloc(&self, images: u32, bit_depth: u32) -> PieceResult<SequenceId> {
        let id = {
            let mut next = self.shared.next_id.lock();
            *next += 1;
            *next
        };
        self.shared.sequences.lock().insert(id, (images, Vec::new()));
        self.shared.record(AlpCall::SeqAlloc(images, bit_depth, id));
        Ok(id)
    }

    fn free_seq(&self, sequence: SequenceId) -> PieceResult<()> {
        self.shared.record(AlpCall::FreeSeq(sequence));
        match self.shared.sequences.lock().remove(&sequence) {
            Some(_) => Ok(()),
            None => Err(PieceError::hardware(format!("ALP sequence {sequence} not allocated"))),
        }
    }

    fn seq_put(&self, sequence: SequenceId, data: &[u8]) -> PieceResult<()> {
        self.shared.record(AlpCall::SeqPut(sequence, data.len()));
        let mut sequences = self.shared.sequences.lock();
        let (images, stored) = sequences
            .get_mut(&sequence)
            .ok_or_else(|| PieceError::hardware(format!("ALP sequence {sequence} not allocated")))?;
        if data.len() != *images as usize * self.frame_len() {
            return Err(PieceError::hardware("ALP_PARM_INVALID"));
        }
        *stored = data.to_vec();
        Ok(())
    }

    fn set_timing(&self, sequence: SequenceId, illumination_us: i64) -> PieceResult<()> {
        self.shared.record(AlpCall::SetTiming(sequence, illumination_us));
        Ok(())
    }

    fn run(&self, sequence: SequenceId, looping: bool) -> PieceResult<()> {
        self.shared.record(AlpCall::Run(sequence, looping));
        Ok(())
    }

    fn halt(&self) -> PieceResult<()> {
        self.shared.record(AlpCall::Halt);
        Ok(())
    }

    fn set_projection_mode(&self, mode: ProjectionMode) -> PieceResult<()> {
        self.shared.record(AlpCall::ProjectionMode(mode));
        Ok(())
    }

    fn set_trigger_edge(&self, edge: TriggerEdge) -> PieceResult<()> {
        self.shared.record(AlpCall::TriggerEdge(edge));
        Ok(())
    }

    fn free(&self) -> PieceResult<()> {
        self.shared.record(AlpCall::Free);
        Ok(())
    }
}

/// Simulated library with one DMD attached.
#[derive(Debug)]
pub struct MockAlp {
    shared: Arc<Shared>,
    size: (usize, usize),
}

impl MockAlp {
    /// Library whose DMD has `size_x` × `size_y` mirrors.
    pub fn new(size_x: usize, size_y: usize) -> Self {
        Self {
            shared: Arc::new(Shared::default()),
            size: (size_x, size_y),
        }
    }

    /// Recorded calls.
    pub fn calls(&self) -> Vec<AlpCall> {
        self.shared.calls.lock().clone()
    }

    /// Bytes last uploaded to `sequence`.
    pub fn uploaded(&self, sequence: SequenceId) -> Option<Vec<u8>> {
        self.shared
            .sequences
            .lock()
            .get(&sequence)
            .map(|(_, data)| data.clone())
    }

    /// Sequences still allocated.
    pub fn allocated(&self) -> Vec<SequenceId> {
        self.shared.sequences.lock().keys().copied().collect()
    }
}

impl AlpLibrary for MockAlp {
    fn initialize(&self, version: &str) -> PieceResult<Arc<dyn AlpDevice>> {
        self.shared.record(AlpCall::Initialize(version.to_string()));
        Ok(Arc::new(MockDevice {
            shared: self.shared.clone(),
            size: self.size,
        }))
    }
}
