//! Bevy integration.
//!
//! Add [`HeightmapReliefPlugin`] and spawn entities with a [`HeightmapRelief`]
//! configuration. The plugin loads the heightmaps through the [`AssetServer`],
//! shares pixels and built geometry between entities through [`ReliefCache`],
//! attaches a [`Mesh3d`] plus a [`ReliefGeometry`] to each entity, and blends
//! the mesh toward whatever weights the entity's [`MorphAnimator`] holds.
//!
//! Materials are not managed here: react to [`ReliefImageChanged`] and
//! [`ReliefGeometryChanged`] to attach one.
//!
//! # Example
//!
//! ```ignore
//! use bevy::prelude::*;
//! use bevy_heightmap_relief::{GeometryStyle, HeightmapRelief, HeightmapReliefPlugin, MorphAnimator};
//!
//! fn setup(mut commands: Commands) {
//!     commands.spawn(
//!         HeightmapRelief::new("maps/valley.png")
//!             .with_morph_source(1, "maps/valley_flooded.png")
//!             .with_max_height(40.0)
//!             .with_style(GeometryStyle::Smooth),
//!     );
//! }
//!
//! fn flood(time: Res<Time>, mut animators: Query<&mut MorphAnimator>) {
//!     for mut animator in &mut animators {
//!         animator.morph_to(1, 2.0, time.elapsed()).ok();
//!     }
//! }
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use bevy::asset::LoadState;
use bevy::prelude::*;
use serde::{Deserialize, Serialize};

use crate::cache::{CacheKey, ContentCache};
use crate::error::{Error, Result};
use crate::geometry::Geometry;
use crate::loader::{HeightmapDecoder, HeightmapLoader, HeightmapSet, LoadStatus};
use crate::mesher::{
    DEFAULT_MAX_HEIGHT, GeometryStyle, MORPH_TARGET_COUNT, ReliefMeshBuilder, validate_max_height,
};
use crate::morph::{MorphAnimator, MorphEvent};
use crate::pixels::PixelBuffer;

/// Registers the relief resource, messages and systems.
pub struct HeightmapReliefPlugin;

impl Plugin for HeightmapReliefPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<ReliefCache>()
            .add_message::<MorphStarted>()
            .add_message::<MorphFinished>()
            .add_message::<ReliefGeometryChanged>()
            .add_message::<ReliefImageChanged>()
            .add_message::<HeightmapLoadFailed>()
            .add_systems(
                Update,
                (
                    release_removed_reliefs,
                    request_heightmaps,
                    poll_heightmap_decodes,
                    build_relief_geometry,
                    tick_morph_animators,
                    apply_morph_weights,
                )
                    .chain()
                    .in_set(ReliefSystems),
            );
    }
}

/// System set containing every relief system, in pipeline order.
#[derive(SystemSet, Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReliefSystems;

/// Relief configuration of one displayed image.
///
/// Changing any field reloads what changed and rebuilds the geometry.
#[derive(Component, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[require(MorphAnimator)]
#[serde(default)]
pub struct HeightmapRelief {
    /// Heightmap per slot. Slot 0 is required; 1-3 are optional morph targets.
    pub heightmap_sources: [String; MORPH_TARGET_COUNT],
    /// Depth of a white texel.
    pub max_height: f32,
    /// Geometry construction algorithm.
    pub geometry_style: GeometryStyle,
    /// Color image shown on the relief. Only forwarded in [`ReliefImageChanged`].
    pub image_source: String,
}

impl Default for HeightmapRelief {
    fn default() -> Self {
        Self {
            heightmap_sources: Default::default(),
            max_height: DEFAULT_MAX_HEIGHT,
            geometry_style: GeometryStyle::default(),
            image_source: String::new(),
        }
    }
}

impl HeightmapRelief {
    /// A Smooth relief over `heightmap` with the default max height.
    pub fn new(heightmap: impl Into<String>) -> Self {
        let mut relief = Self::default();
        relief.heightmap_sources[0] = heightmap.into();
        relief
    }

    /// Sets the heightmap of slot `index`. An index outside `0..4` is logged
    /// and leaves the configuration unchanged; use
    /// [`set_heightmap_source`](Self::set_heightmap_source) to get the error.
    pub fn with_morph_source(mut self, index: usize, heightmap: impl Into<String>) -> Self {
        if let Err(err) = self.set_heightmap_source(index, heightmap) {
            tracing::warn!(error = %err, "ignoring morph source");
        }
        self
    }

    /// Sets the heightmap of slot `index`.
    pub fn set_heightmap_source(&mut self, index: usize, heightmap: impl Into<String>) -> Result<()> {
        let slot = self
            .heightmap_sources
            .get_mut(index)
            .ok_or(Error::SlotIndexOutOfRange { index })?;
        *slot = heightmap.into();
        Ok(())
    }

    /// Sets the max height.
    pub fn with_max_height(mut self, max_height: f32) -> Self {
        self.max_height = max_height;
        self
    }

    /// Sets the geometry style.
    pub fn with_style(mut self, style: GeometryStyle) -> Self {
        self.geometry_style = style;
        self
    }

    /// Sets the color image source.
    pub fn with_image_source(mut self, image: impl Into<String>) -> Self {
        self.image_source = image.into();
        self
    }

    /// Checks the max height and that slot 0 names a heightmap.
    pub fn validate(&self) -> Result<()> {
        validate_max_height(self.max_height)?;
        if self.heightmap_sources[0].is_empty() {
            return Err(Error::MissingHeightmap { index: 0 });
        }
        Ok(())
    }

    /// A mesh builder for this configuration.
    pub fn builder(&self) -> ReliefMeshBuilder {
        ReliefMeshBuilder::new(self.geometry_style).with_max_height(self.max_height)
    }
}

/// Geometry currently displayed by an entity.
///
/// Holds one reference on `key` in [`ReliefCache`], released when the
/// geometry is replaced or the relief is removed.
#[derive(Component, Debug, Clone)]
pub struct ReliefGeometry {
    /// Geometry cache key.
    pub key: CacheKey,
    /// Shared geometry.
    pub geometry: Arc<Geometry>,
}

/// A timed morph started on `entity`.
#[derive(Message, Debug, Clone, PartialEq, Eq)]
pub struct MorphStarted {
    /// The relief entity.
    pub entity: Entity,
    /// Target morph index.
    pub target: usize,
}

/// A timed morph finished on `entity`.
#[derive(Message, Debug, Clone, PartialEq, Eq)]
pub struct MorphFinished {
    /// The relief entity.
    pub entity: Entity,
    /// Target morph index.
    pub target: usize,
}

/// `entity` now displays the geometry cached under `key`.
#[derive(Message, Debug, Clone, PartialEq, Eq)]
pub struct ReliefGeometryChanged {
    /// The relief entity.
    pub entity: Entity,
    /// Geometry cache key.
    pub key: CacheKey,
}

/// The color image of `entity` changed.
#[derive(Message, Debug, Clone, PartialEq, Eq)]
pub struct ReliefImageChanged {
    /// The relief entity.
    pub entity: Entity,
    /// New image source.
    pub image_source: String,
}

/// A heightmap slot of `entity` could not be populated.
#[derive(Message, Debug, Clone)]
pub struct HeightmapLoadFailed {
    /// The relief entity.
    pub entity: Entity,
    /// Slot index.
    pub index: usize,
    /// Why.
    pub error: Error,
}

#[derive(Debug, Default)]
struct ReliefState {
    heightmaps: HeightmapSet,
    config: Option<HeightmapRelief>,
    geometry_key: Option<CacheKey>,
    needs_build: bool,
}

/// Heightmap and geometry caches shared by every relief entity.
///
/// The plugin systems drive it through [`configure`](Self::configure),
/// [`finish_decode`](Self::finish_decode),
/// [`build_geometry`](Self::build_geometry) and
/// [`release_relief`](Self::release_relief), in that order within a frame.
#[derive(Resource, Debug, Default)]
pub struct ReliefCache {
    heightmaps: HeightmapLoader<Entity>,
    geometries: ContentCache<Arc<Geometry>>,
    states: HashMap<Entity, ReliefState>,
    decoding: HashMap<String, Handle<Image>>,
}

impl ReliefCache {
    /// The heightmap loader.
    pub fn heightmaps(&self) -> &HeightmapLoader<Entity> {
        &self.heightmaps
    }

    /// The geometry cache.
    pub fn geometries(&self) -> &ContentCache<Arc<Geometry>> {
        &self.geometries
    }

    /// Heightmap slots of `entity`, if it has a relief.
    pub fn heightmap_set(&self, entity: Entity) -> Option<&HeightmapSet> {
        self.states.get(&entity).map(|state| &state.heightmaps)
    }

    /// Key of the geometry `entity` currently holds.
    pub fn geometry_key(&self, entity: Entity) -> Option<&CacheKey> {
        self.states.get(&entity)?.geometry_key.as_ref()
    }

    /// Applies a new configuration to `entity`.
    ///
    /// Reloads the heightmap slots whose source changed and schedules a
    /// geometry build once every slot has settled. A configuration that only
    /// changes the style or max height completes immediately.
    pub fn configure<D: HeightmapDecoder + ?Sized>(
        &mut self,
        entity: Entity,
        relief: &HeightmapRelief,
        decoder: &mut D,
    ) -> Result<LoadStatus> {
        relief.validate()?;
        let state = self.states.entry(entity).or_default();
        state.config = Some(relief.clone());

        let sources = &relief.heightmap_sources;
        let status = state
            .heightmaps
            .load_all(sources, entity, &mut self.heightmaps, decoder)?;
        if status == LoadStatus::Complete {
            state.needs_build = true;
        }
        Ok(status)
    }

    /// Routes a finished decode of `source` to every relief waiting on it.
    ///
    /// Returns the slot failures to report: decode errors and dimension
    /// mismatches. Stale deliveries are dropped silently.
    pub fn finish_decode(
        &mut self,
        source: &str,
        result: Result<PixelBuffer>,
    ) -> Vec<HeightmapLoadFailed> {
        let mut failures = Vec::new();
        for delivery in self.heightmaps.finish_decode(source, result) {
            let (entity, index) = (delivery.requester, delivery.index);
            let decode_error = delivery.result.as_ref().err().cloned();
            let Some(state) = self.states.get_mut(&entity) else {
                tracing::debug!(?entity, source, "relief gone before its heightmap loaded");
                continue;
            };

            match state.heightmaps.deliver(delivery, &mut self.heightmaps) {
                Ok(LoadStatus::Complete) => state.needs_build = true,
                Ok(LoadStatus::Stale) => continue,
                Ok(LoadStatus::Loading { .. }) => {}
                Err(error) => failures.push(HeightmapLoadFailed {
                    entity,
                    index,
                    error,
                }),
            }
            if let Some(error) = decode_error {
                failures.push(HeightmapLoadFailed {
                    entity,
                    index,
                    error,
                });
            }
        }
        failures
    }

    /// Builds or reuses geometry for every relief whose heightmaps settled
    /// since the last call.
    ///
    /// Returns the reliefs whose displayed geometry changed. Each returned
    /// geometry holds one reference, and the one it replaces is released.
    /// Reliefs in a dimension conflict or without a primary heightmap keep
    /// their previous geometry.
    pub fn build_geometry(&mut self) -> Vec<(Entity, ReliefGeometry)> {
        let Self {
            geometries, states, ..
        } = self;

        let mut changed = Vec::new();
        for (&entity, state) in states.iter_mut() {
            if !std::mem::take(&mut state.needs_build) {
                continue;
            }
            let Some(config) = &state.config else {
                continue;
            };
            if let Some(conflict) = state.heightmaps.conflict() {
                tracing::warn!(?entity, error = %conflict, "heightmaps conflict, not building");
                continue;
            }
            if !state.heightmaps.slot(0).is_ok_and(|slot| slot.pixels().is_some()) {
                tracing::warn!(?entity, "primary heightmap unavailable, keeping previous geometry");
                continue;
            }

            let (key, geometry) = match acquire_geometry(geometries, &state.heightmaps, config) {
                Ok(acquired) => acquired,
                Err(err) => {
                    tracing::error!(?entity, error = %err, "failed to build relief geometry");
                    continue;
                }
            };
            if state.geometry_key.as_ref() == Some(&key) {
                // Same geometry as displayed: drop the extra reference.
                if let Err(err) = geometries.release(&key) {
                    tracing::error!(?entity, error = %err, "failed to release geometry");
                }
                continue;
            }
            if let Some(old) = state.geometry_key.replace(key.clone()) {
                if let Err(err) = geometries.release(&old) {
                    tracing::error!(?entity, error = %err, "failed to release geometry");
                }
            }
            changed.push((entity, ReliefGeometry { key, geometry }));
        }
        changed
    }

    /// Releases everything `entity` holds. No-op for unknown entities.
    pub fn release_relief(&mut self, entity: Entity) -> Result<()> {
        let Some(mut state) = self.states.remove(&entity) else {
            return Ok(());
        };
        state.heightmaps.free_all(&mut self.heightmaps)?;
        if let Some(key) = state.geometry_key.take() {
            self.geometries.release(&key)?;
        }
        tracing::debug!(?entity, "released relief");
        Ok(())
    }
}

/// Takes one reference on the geometry for `config`, building it on a miss.
fn acquire_geometry(
    geometries: &mut ContentCache<Arc<Geometry>>,
    heightmaps: &HeightmapSet,
    config: &HeightmapRelief,
) -> Result<(CacheKey, Arc<Geometry>)> {
    let pixels = heightmaps.pixels();
    let held = heightmaps.sources();
    // Key what actually feeds the build: the slots' own sources, and only
    // where pixels loaded.
    let sources: [&str; MORPH_TARGET_COUNT] =
        std::array::from_fn(|i| if pixels[i].is_some() { held[i] } else { "" });
    let key = CacheKey::geometry(&sources, config.max_height, config.geometry_style);

    if geometries.has(&key) {
        geometries.add_ref(&key)?;
        return Ok((key.clone(), Arc::clone(geometries.get(&key)?)));
    }
    let geometry = Arc::new(config.builder().build(&pixels)?);
    geometries.set(key.clone(), Arc::clone(&geometry))?;
    Ok((key, geometry))
}

/// Decodes heightmaps as [`Image`] assets.
struct AssetServerDecoder<'a> {
    server: &'a AssetServer,
    started: Vec<(String, Handle<Image>)>,
}

impl HeightmapDecoder for AssetServerDecoder<'_> {
    fn start_decode(&mut self, source: &str) {
        let handle: Handle<Image> = self.server.load(source.to_string());
        self.started.push((source.to_string(), handle));
    }
}

fn release_removed_reliefs(
    mut commands: Commands,
    mut removed: RemovedComponents<HeightmapRelief>,
    mut cache: ResMut<ReliefCache>,
) {
    for entity in removed.read() {
        if let Err(err) = cache.release_relief(entity) {
            tracing::error!(?entity, error = %err, "failed to release relief");
        }
        if let Ok(mut entity_commands) = commands.get_entity(entity) {
            entity_commands.try_remove::<ReliefGeometry>();
        }
    }
}

fn request_heightmaps(
    mut cache: ResMut<ReliefCache>,
    asset_server: Res<AssetServer>,
    reliefs: Query<(Entity, &HeightmapRelief), Changed<HeightmapRelief>>,
    mut image_changed: MessageWriter<ReliefImageChanged>,
) {
    let mut decoder = AssetServerDecoder {
        server: &asset_server,
        started: Vec::new(),
    };

    for (entity, relief) in &reliefs {
        if let Err(err) = relief.validate() {
            tracing::error!(?entity, error = %err, "invalid heightmap relief");
            continue;
        }
        let image_changed_now = cache
            .states
            .get(&entity)
            .and_then(|state| state.config.as_ref())
            .is_none_or(|old| old.image_source != relief.image_source);
        if image_changed_now {
            image_changed.write(ReliefImageChanged {
                entity,
                image_source: relief.image_source.clone(),
            });
        }

        match cache.configure(entity, relief, &mut decoder) {
            Ok(status) => tracing::debug!(?entity, ?status, "relief configured"),
            Err(err) => tracing::error!(?entity, error = %err, "failed to load heightmaps"),
        }
    }
    cache.decoding.extend(decoder.started);
}

fn poll_heightmap_decodes(
    mut cache: ResMut<ReliefCache>,
    asset_server: Res<AssetServer>,
    images: Res<Assets<Image>>,
    mut failed: MessageWriter<HeightmapLoadFailed>,
) {
    let mut finished = Vec::new();
    cache.decoding.retain(|source, handle| {
        let result = match asset_server.load_state(handle.id()) {
            LoadState::Loaded => match images.get(handle.id()) {
                Some(image) => PixelBuffer::from_image(image),
                None => Err(Error::Decode {
                    heightmap: source.clone(),
                    message: "image asset was unloaded".to_string(),
                }),
            },
            LoadState::Failed(err) => Err(Error::Decode {
                heightmap: source.clone(),
                message: err.to_string(),
            }),
            _ => return true,
        };
        finished.push((source.clone(), result));
        false
    });

    for (source, result) in finished {
        for failure in cache.finish_decode(&source, result) {
            tracing::error!(
                entity = ?failure.entity,
                index = failure.index,
                error = %failure.error,
                "heightmap slot not populated"
            );
            failed.write(failure);
        }
    }
}

fn build_relief_geometry(
    mut commands: Commands,
    mut cache: ResMut<ReliefCache>,
    mut meshes: ResMut<Assets<Mesh>>,
    mut changed: MessageWriter<ReliefGeometryChanged>,
) {
    for (entity, relief_geometry) in cache.build_geometry() {
        let mesh = meshes.add(relief_geometry.geometry.to_mesh());
        let key = relief_geometry.key.clone();
        if let Ok(mut entity_commands) = commands.get_entity(entity) {
            entity_commands.try_insert((relief_geometry, Mesh3d(mesh)));
        }
        changed.write(ReliefGeometryChanged { entity, key });
    }
}

fn tick_morph_animators(
    time: Res<Time>,
    mut animators: Query<(Entity, &mut MorphAnimator)>,
    mut started: MessageWriter<MorphStarted>,
    mut finished: MessageWriter<MorphFinished>,
) {
    let now = time.elapsed();
    for (entity, mut animator) in &mut animators {
        if animator.is_morphing() {
            animator.tick(now);
        }
        if !animator.has_events() {
            continue;
        }
        for event in animator.drain_events() {
            match event {
                MorphEvent::Begin { target } => {
                    started.write(MorphStarted { entity, target });
                }
                MorphEvent::End { target } => {
                    finished.write(MorphFinished { entity, target });
                }
            }
        }
    }
}

fn apply_morph_weights(
    reliefs: Query<
        (&MorphAnimator, &ReliefGeometry, &Mesh3d),
        Or<(Changed<MorphAnimator>, Changed<ReliefGeometry>)>,
    >,
    mut meshes: ResMut<Assets<Mesh>>,
) {
    for (animator, relief, mesh3d) in &reliefs {
        let Some(mesh) = meshes.get_mut(&mesh3d.0) else {
            continue;
        };
        let blended = relief.geometry.blend(animator.weights());
        let positions: Vec<[f32; 3]> = blended.positions.into_iter().map(Into::into).collect();
        let normals: Vec<[f32; 3]> = blended.normals.into_iter().map(Into::into).collect();
        mesh.insert_attribute(Mesh::ATTRIBUTE_POSITION, positions);
        mesh.insert_attribute(Mesh::ATTRIBUTE_NORMAL, normals);
    }
}
