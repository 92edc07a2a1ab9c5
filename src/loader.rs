//! Heightmap loading with in-flight deduplication.
//!
//! Decoding is asynchronous and owned by a [`HeightmapDecoder`]: the loader
//! asks it to start a decode and is told the outcome later through
//! [`HeightmapLoader::finish_decode`], on the owning thread.
//!
//! Every requested source gets one entry in the loader's [`ContentCache`],
//! inserted as soon as the first decode starts. A second request for the same
//! source (from any requester) joins that entry: it takes a reference and
//! queues a [`Waiter`] instead of starting another decode. When the decode
//! finishes, every queued waiter receives the same buffer exactly once.
//!
//! [`HeightmapSet`] is the per-owner side: four slots, the equal-dimensions
//! check, and completion tracking.

use std::fmt;
use std::sync::Arc;

use crate::cache::{CacheKey, ContentCache};
use crate::error::{Error, Result};
use crate::mesher::MORPH_TARGET_COUNT;
use crate::pixels::PixelBuffer;

/// Starts asynchronous heightmap decodes.
///
/// Implementations must eventually report each started decode (success or
/// failure) through [`HeightmapLoader::finish_decode`]. There is no
/// cancellation.
pub trait HeightmapDecoder {
    /// Begin decoding `source`.
    fn start_decode(&mut self, source: &str);
}

/// A requester waiting for a pending decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Waiter<R> {
    /// Who asked.
    pub requester: R,
    /// Which of the requester's slots the buffer is for.
    pub index: usize,
}

/// Payload of a heightmap cache entry.
#[derive(Debug)]
pub enum HeightmapEntry<R> {
    /// Decode in flight; waiters are notified on completion.
    Pending(Vec<Waiter<R>>),
    /// Decoded pixels.
    Loaded(Arc<PixelBuffer>),
}

/// Outcome of [`HeightmapLoader::request`].
#[derive(Debug, Clone)]
pub enum SlotRequest {
    /// Pixels were already cached.
    Ready(Arc<PixelBuffer>),
    /// The requester will receive a [`Delivery`] when the decode completes.
    Pending,
}

/// A finished decode routed to one waiter.
#[derive(Debug, Clone)]
pub struct Delivery<R> {
    /// Who asked.
    pub requester: R,
    /// The requester's slot.
    pub index: usize,
    /// The decoded source.
    pub source: String,
    /// Shared pixels, or the decode error.
    pub result: Result<Arc<PixelBuffer>>,
}

/// Deduplicating heightmap loader, generic over the requester id `R`.
pub struct HeightmapLoader<R> {
    cache: ContentCache<HeightmapEntry<R>>,
    decodes_started: usize,
}

impl<R> Default for HeightmapLoader<R> {
    fn default() -> Self {
        Self {
            cache: ContentCache::new(),
            decodes_started: 0,
        }
    }
}

impl<R: fmt::Debug> fmt::Debug for HeightmapLoader<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeightmapLoader")
            .field("entries", &self.cache.len())
            .field("decodes_started", &self.decodes_started)
            .finish()
    }
}

impl<R: Copy + fmt::Debug> HeightmapLoader<R> {
    /// Creates an empty loader.
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires a reference on `source` for `requester`'s slot `index`.
    ///
    /// - Loaded entry: takes a reference and returns the pixels.
    /// - Pending entry: takes a reference and queues a waiter.
    /// - No entry: inserts a pending entry, queues a waiter and starts a
    ///   decode.
    ///
    /// In every case the caller now owns one reference on the returned key.
    pub fn request<D: HeightmapDecoder + ?Sized>(
        &mut self,
        source: &str,
        requester: R,
        index: usize,
        decoder: &mut D,
    ) -> Result<(CacheKey, SlotRequest)> {
        let key = CacheKey::heightmap(source);
        let waiter = Waiter { requester, index };

        if !self.cache.has(&key) {
            self.cache
                .set(key.clone(), HeightmapEntry::Pending(vec![waiter]))?;
            self.decodes_started += 1;
            tracing::debug!(source, ?requester, index, "starting heightmap decode");
            decoder.start_decode(source);
            return Ok((key, SlotRequest::Pending));
        }

        self.cache.add_ref(&key)?;
        match self.cache.get_mut(&key)? {
            HeightmapEntry::Loaded(pixels) => Ok((key, SlotRequest::Ready(Arc::clone(pixels)))),
            HeightmapEntry::Pending(waiters) => {
                tracing::debug!(source, ?requester, index, "joining in-flight heightmap decode");
                waiters.push(waiter);
                Ok((key, SlotRequest::Pending))
            }
        }
    }

    /// Records the outcome of a decode and returns one [`Delivery`] per
    /// waiter, in request order.
    ///
    /// On success the entry turns from pending to loaded, once. On failure
    /// the entry is dropped: its waiters hold no reference afterwards. A
    /// decode for a source nobody holds anymore is discarded.
    pub fn finish_decode(
        &mut self,
        source: &str,
        result: Result<PixelBuffer>,
    ) -> Vec<Delivery<R>> {
        let key = CacheKey::heightmap(source);
        let Ok(HeightmapEntry::Pending(waiters)) = self.cache.get_mut(&key) else {
            tracing::debug!(source, "discarding decode nobody is waiting for");
            return Vec::new();
        };
        let waiters = std::mem::take(waiters);

        let result = match result {
            Ok(pixels) => {
                let pixels = Arc::new(pixels);
                if let Ok(entry) = self.cache.get_mut(&key) {
                    *entry = HeightmapEntry::Loaded(Arc::clone(&pixels));
                }
                tracing::debug!(source, waiters = waiters.len(), "heightmap decoded");
                Ok(pixels)
            }
            Err(err) => {
                self.cache.remove(&key);
                tracing::warn!(source, error = %err, "heightmap decode failed");
                Err(err)
            }
        };

        waiters
            .into_iter()
            .map(|waiter| Delivery {
                requester: waiter.requester,
                index: waiter.index,
                source: source.to_string(),
                result: result.clone(),
            })
            .collect()
    }

    /// Drops one reference on a heightmap key.
    pub fn release(&mut self, key: &CacheKey) -> Result<()> {
        self.cache.release(key).map(drop)
    }

    /// The underlying cache.
    pub fn cache(&self) -> &ContentCache<HeightmapEntry<R>> {
        &self.cache
    }

    /// Number of decodes started so far.
    pub fn decodes_started(&self) -> usize {
        self.decodes_started
    }
}

/// Load state of a [`HeightmapSlot`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SlotState {
    /// No source.
    #[default]
    Empty,
    /// Waiting for a decode.
    Loading,
    /// Pixels available.
    Ready,
    /// Decode failed or dimensions conflicted; holds no reference.
    Failed,
}

/// One of the four heightmap slots of a relief.
#[derive(Debug, Clone, Default)]
pub struct HeightmapSlot {
    source: String,
    pixels: Option<Arc<PixelBuffer>>,
    key: Option<CacheKey>,
    state: SlotState,
}

impl HeightmapSlot {
    /// Requested source, empty for an unused slot.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Pixels, once loaded.
    pub fn pixels(&self) -> Option<&Arc<PixelBuffer>> {
        self.pixels.as_ref()
    }

    /// Cache key this slot holds a reference on.
    pub fn key(&self) -> Option<&CacheKey> {
        self.key.as_ref()
    }

    /// Current load state.
    pub fn state(&self) -> SlotState {
        self.state
    }
}

/// Progress of a [`HeightmapSet`] load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStatus {
    /// Some slots are still decoding.
    Loading {
        /// Slots left.
        remaining: usize,
    },
    /// Every requested slot has settled. Reported once per load.
    Complete,
    /// The delivery was for a slot that no longer wants it.
    Stale,
}

/// The four heightmap slots owned by one relief.
///
/// Slot 0 is the primary heightmap; slots 1-3 are morph target alternates.
/// All populated slots share one size.
#[derive(Debug, Clone, Default)]
pub struct HeightmapSet {
    slots: [HeightmapSlot; MORPH_TARGET_COUNT],
    /// First dimension mismatch since the last `load_all`.
    conflict: Option<Error>,
}

impl HeightmapSet {
    /// Creates a set with four empty slots.
    pub fn new() -> Self {
        Self::default()
    }

    /// Borrows slot `index`.
    pub fn slot(&self, index: usize) -> Result<&HeightmapSlot> {
        self.slots
            .get(index)
            .ok_or(Error::SlotIndexOutOfRange { index })
    }

    /// Pixel buffers of every slot, `None` where unpopulated.
    pub fn pixels(&self) -> [Option<&PixelBuffer>; MORPH_TARGET_COUNT] {
        std::array::from_fn(|i| self.slots[i].pixels.as_deref())
    }

    /// Sources of every slot.
    pub fn sources(&self) -> [&str; MORPH_TARGET_COUNT] {
        std::array::from_fn(|i| self.slots[i].source.as_str())
    }

    /// Number of slots still decoding.
    pub fn pending(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.state == SlotState::Loading)
            .count()
    }

    /// Whether no slot is still decoding.
    pub fn is_complete(&self) -> bool {
        self.pending() == 0
    }

    /// The dimension mismatch that rejected a slot since the last
    /// [`load_all`](Self::load_all), if any. Geometry must not be built from a
    /// set in conflict.
    pub fn conflict(&self) -> Option<&Error> {
        self.conflict.as_ref()
    }

    /// Points every slot at `sources`, reusing slots whose source is
    /// unchanged and reloading the rest.
    ///
    /// Every changed slot is freed before any new source is requested, so
    /// new buffers are only ever checked against slots that stay. Afterwards
    /// each slot holds exactly the source asked for. A dimension mismatch on
    /// a synchronously available buffer is recorded as the set's
    /// [`conflict`](Self::conflict) and returned; any other failure frees the
    /// whole set.
    ///
    /// Returns [`LoadStatus::Complete`] when every slot was satisfied
    /// synchronously; otherwise completion is reported by the [`deliver`]
    /// call that settles the last slot.
    ///
    /// [`deliver`]: Self::deliver
    pub fn load_all<R, D>(
        &mut self,
        sources: &[String; MORPH_TARGET_COUNT],
        requester: R,
        loader: &mut HeightmapLoader<R>,
        decoder: &mut D,
    ) -> Result<LoadStatus>
    where
        R: Copy + fmt::Debug,
        D: HeightmapDecoder + ?Sized,
    {
        self.conflict = None;
        let changed: Vec<usize> = (0..MORPH_TARGET_COUNT)
            .filter(|&index| {
                let slot = &self.slots[index];
                slot.source != sources[index] || slot.state == SlotState::Failed
            })
            .collect();

        for &index in &changed {
            self.free_slot(index, loader)?;
        }
        for &index in &changed {
            if let Err(err) = self.load_slot(&sources[index], index, requester, loader, decoder) {
                self.free_all(loader)?;
                return Err(err);
            }
        }

        match &self.conflict {
            Some(conflict) => Err(conflict.clone()),
            None => Ok(self.status()),
        }
    }

    /// Loads `source` into slot `index`. An empty source leaves the slot
    /// unpopulated.
    ///
    /// The slot must be empty; use [`free_slot`](Self::free_slot) first.
    pub fn load_slot<R, D>(
        &mut self,
        source: &str,
        index: usize,
        requester: R,
        loader: &mut HeightmapLoader<R>,
        decoder: &mut D,
    ) -> Result<()>
    where
        R: Copy + fmt::Debug,
        D: HeightmapDecoder + ?Sized,
    {
        if index >= MORPH_TARGET_COUNT {
            return Err(Error::SlotIndexOutOfRange { index });
        }
        debug_assert!(self.slots[index].key.is_none(), "slot {index} still holds a key");
        self.slots[index].source = source.to_string();
        if source.is_empty() {
            return Ok(());
        }

        let (key, request) = loader.request(source, requester, index, decoder)?;
        self.slots[index].key = Some(key);
        match request {
            SlotRequest::Ready(pixels) => {
                if let Some(conflict) = self.accept(index, pixels, loader)? {
                    tracing::warn!(index, source, error = %conflict, "rejected cached heightmap");
                }
            }
            SlotRequest::Pending => self.slots[index].state = SlotState::Loading,
        }
        Ok(())
    }

    /// Applies a [`Delivery`] from [`HeightmapLoader::finish_decode`].
    ///
    /// A failed decode leaves the slot unpopulated and still counts toward
    /// completion. A buffer whose size conflicts with another populated slot
    /// is released, recorded as the set's [`conflict`](Self::conflict) and
    /// reported as [`Error::DimensionMismatch`].
    pub fn deliver<R: Copy + fmt::Debug>(
        &mut self,
        delivery: Delivery<R>,
        loader: &mut HeightmapLoader<R>,
    ) -> Result<LoadStatus> {
        let Delivery {
            index,
            source,
            result,
            ..
        } = delivery;
        let Some(slot) = self.slots.get_mut(index) else {
            return Err(Error::SlotIndexOutOfRange { index });
        };
        if slot.state != SlotState::Loading || slot.source != source {
            tracing::warn!(index, %source, "ignoring stale heightmap delivery");
            return Ok(LoadStatus::Stale);
        }

        match result {
            Ok(pixels) => {
                if let Some(conflict) = self.accept(index, pixels, loader)? {
                    return Err(conflict);
                }
            }
            Err(err) => {
                // The loader dropped the entry, so there is nothing to release.
                slot.key = None;
                slot.state = SlotState::Failed;
                tracing::warn!(index, error = %err, "heightmap slot left unpopulated");
            }
        }
        Ok(self.status())
    }

    /// Releases slot `index` and clears it. No-op for an empty slot.
    pub fn free_slot<R: Copy + fmt::Debug>(
        &mut self,
        index: usize,
        loader: &mut HeightmapLoader<R>,
    ) -> Result<()> {
        let slot = self
            .slots
            .get_mut(index)
            .ok_or(Error::SlotIndexOutOfRange { index })?;
        let key = slot.key.take();
        *slot = HeightmapSlot::default();
        if let Some(key) = key {
            loader.release(&key)?;
        }
        Ok(())
    }

    /// Releases every slot and forgets any conflict.
    pub fn free_all<R: Copy + fmt::Debug>(&mut self, loader: &mut HeightmapLoader<R>) -> Result<()> {
        self.conflict = None;
        (0..MORPH_TARGET_COUNT).try_for_each(|index| self.free_slot(index, loader))
    }

    /// Stores `pixels` in slot `index`, or rejects them on a size conflict
    /// and returns the mismatch.
    fn accept<R: Copy + fmt::Debug>(
        &mut self,
        index: usize,
        pixels: Arc<PixelBuffer>,
        loader: &mut HeightmapLoader<R>,
    ) -> Result<Option<Error>> {
        let conflict = self
            .slots
            .iter()
            .enumerate()
            .filter(|&(i, _)| i != index)
            .find_map(|(_, slot)| slot.pixels.as_ref())
            .map(|other| other.dimensions())
            .filter(|&expected| expected != pixels.dimensions());

        if let Some(expected) = conflict {
            let slot = &mut self.slots[index];
            slot.state = SlotState::Failed;
            if let Some(key) = slot.key.take() {
                loader.release(&key)?;
            }
            let mismatch = Error::DimensionMismatch {
                index,
                expected,
                found: pixels.dimensions(),
            };
            self.conflict.get_or_insert_with(|| mismatch.clone());
            return Ok(Some(mismatch));
        }

        let slot = &mut self.slots[index];
        slot.pixels = Some(pixels);
        slot.state = SlotState::Ready;
        Ok(None)
    }

    fn status(&self) -> LoadStatus {
        match self.pending() {
            0 => LoadStatus::Complete,
            remaining => LoadStatus::Loading { remaining },
        }
    }
}
