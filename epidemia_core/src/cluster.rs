//! Cluster hierarchy and exposure propagation.
//!
//! Every city holds one tree ("family") of clusters per cluster type:
//! households, workplaces, and so on. Leaves (depth 0) hold people; each
//! level above groups the one below, up to a single root. Clusters live in
//! a per-family arena and refer to each other by index.
//!
//! # Daily propagation
//!
//! ```text
//!   deposit       infectious people ──► leaf accumulators
//!   forward       redirected leaf ──► foreign parent      (× nest_influence)
//!   bubble_up     post-order: child ──► structural parent (× nest_influence)
//!   trickle_down  pre-order:  parent ──► child            (× nest_influence, memoized)
//!   member        leaf exposure × influence               (memoized)
//! ```
//!
//! A leaf's exposure parent is normally its structural parent. A fraction
//! of leaves instead forward to a depth-1 cluster of the same type in a
//! neighboring city; those deposits go through the target's locked foreign
//! accumulator. Every family forwards before any family bubbles up, so a
//! foreign deposit is in place when the receiving tree carries it to its
//! root. Trickle-down always follows the structural parent.

use crate::chooser::Chooser;
use crate::counters::InfectionCounters;
use crate::error::BuildError;
use crate::exposure::{Day, DayExposure, ForeignExposure};
use crate::probability::{combine, scaled};
use crate::reciprocal::Reciprocal;

use epidemia_env::{ConfigSource, RandomSource};
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use tracing::warn;

/// Most cluster types a world may define; also the membership count per person.
pub const MAX_CLUSTER_TYPES: usize = 8;

/// A level with fewer clusters than this collapses into the root.
const MIN_LEVEL_COUNT: usize = 5;

/// Draws before giving up on finding a parent with spare room.
const PARENT_ATTEMPTS: usize = 32;

// =============================================================================
// CLUSTER TYPES
// =============================================================================

/// Shared template for every cluster of one kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterType {
    /// Type name, as used in `cluster.<name>.<field>` properties
    pub name: String,

    /// Smallest leaf cluster
    pub min_pop: f64,

    /// Largest leaf cluster
    pub max_pop: f64,

    /// Mean leaf cluster size
    pub average_pop: f64,

    /// Weight of a deposit on members of the same leaf
    pub influence: f64,

    /// Fewest children of a nesting cluster
    pub nest_min: f64,

    /// Most children of a nesting cluster
    pub nest_max: f64,

    /// Mean children of a nesting cluster
    pub nest_average: f64,

    /// Fraction of exposure passed between levels
    pub nest_influence: f64,

    /// Fraction of leaves whose exposure parent stays in the same city
    pub same_city: f64,

    /// 1 for location-defining clusters (households)
    pub proximality: f64,

    /// Per-deposit exposure, `infection_prob × influence`, set by `finalize`
    #[serde(skip)]
    exposure: f32,
}

impl ClusterType {
    /// A type with neutral parameters.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            min_pop: 2.0,
            max_pop: 20.0,
            average_pop: 6.0,
            influence: 0.1,
            nest_min: 2.0,
            nest_max: 20.0,
            nest_average: 6.0,
            nest_influence: 0.1,
            same_city: 1.0,
            proximality: 0.0,
            exposure: 0.0,
        }
    }

    /// Built-in defaults for the standard types, if `name` is one of them.
    pub fn builtin(name: &str) -> Option<Self> {
        let base = Self::new(name);
        let ty = match name {
            "household" => Self {
                min_pop: 1.0,
                max_pop: 8.0,
                average_pop: 3.0,
                influence: 0.5,
                nest_min: 3.0,
                nest_max: 30.0,
                nest_average: 10.0,
                nest_influence: 0.2,
                same_city: 1.0,
                proximality: 1.0,
                ..base
            },
            "work" => Self {
                min_pop: 2.0,
                max_pop: 500.0,
                average_pop: 12.0,
                influence: 0.1,
                nest_min: 2.0,
                nest_max: 50.0,
                nest_average: 8.0,
                nest_influence: 0.1,
                same_city: 0.95,
                proximality: 0.0,
                ..base
            },
            "social" => Self {
                min_pop: 3.0,
                max_pop: 60.0,
                average_pop: 15.0,
                influence: 0.05,
                nest_min: 2.0,
                nest_max: 20.0,
                nest_average: 6.0,
                nest_influence: 0.1,
                same_city: 0.9,
                proximality: 0.0,
                ..base
            },
            _ => return None,
        };
        Some(ty)
    }

    /// Reads `cluster.<name>.<field>` for every field, starting from `base`.
    pub fn from_config(name: &str, cfg: &impl ConfigSource, base: Self) -> Self {
        let get = |field: &str, default: f64| cfg.get_numeric(&format!("cluster.{name}.{field}"), default);
        Self {
            name: name.to_string(),
            min_pop: get("min_pop", base.min_pop).max(1.0),
            max_pop: get("max_pop", base.max_pop),
            average_pop: get("average_pop", base.average_pop).max(1.0),
            influence: get("influence", base.influence).clamp(0.0, 1.0),
            nest_min: get("nest_min", base.nest_min).max(1.0),
            nest_max: get("nest_max", base.nest_max),
            nest_average: get("nest_average", base.nest_average).max(2.0),
            nest_influence: get("nest_influence", base.nest_influence).clamp(0.0, 1.0),
            same_city: get("same_city", base.same_city).clamp(0.0, 1.0),
            proximality: get("proximality", base.proximality),
            exposure: 0.0,
        }
    }

    /// Location-defining type.
    pub fn is_local(&self) -> bool {
        self.proximality >= 1.0
    }

    /// Root-mean-square of min, average and max leaf size.
    pub fn size_rms(&self) -> f64 {
        ((self.min_pop.powi(2) + self.average_pop.powi(2) + self.max_pop.powi(2)) / 3.0).sqrt()
    }

    /// Contribution of this type to the expected number of contacts per
    /// infectious day.
    pub fn exposure_weight(&self) -> f64 {
        self.size_rms() * self.influence.powi(2)
    }

    /// Exposure added to a leaf by one infectious visitor.
    pub fn exposure(&self) -> f32 {
        self.exposure
    }

    pub(crate) fn finalize(&mut self, infection_prob: f64) {
        self.exposure = (infection_prob * self.influence).clamp(0.0, 1.0) as f32;
    }

    /// Builds the cluster tree of this type for a city of `target_pop` people.
    ///
    /// Leaf sizes follow the reciprocal distribution around `average_pop`.
    /// Each further level groups the previous one with the nesting
    /// parameters, each child attaching to a capacity-weighted parent that
    /// still has room, until a level would hold fewer than five clusters
    /// and collapses into the root.
    pub fn make_family<R: RandomSource>(
        &self,
        type_index: usize,
        city: u32,
        target_pop: u32,
        rng: &mut R,
    ) -> ClusterFamily {
        let mut shapes: Vec<ClusterShape> = Vec::new();
        let mut previous: Vec<u32> = Vec::new();
        let (mut min, mut max, mut average) = (self.min_pop, self.max_pop, self.average_pop);
        let mut depth: u16 = 0;
        loop {
            let base = if depth == 0 {
                target_pop as usize
            } else {
                previous.len()
            };
            let mut count = ((base as f64 / average.max(1.0)) as usize).max(1);
            if count < MIN_LEVEL_COUNT {
                count = 1;
            }
            let sizes: Vec<u32> = if count == 1 {
                vec![base.max(1) as u32]
            } else {
                let max_here = max.min(count as f64 * average - (count - 1) as f64 * min);
                Reciprocal::new(min, max_here, count, average).values_int(rng)
            };
            let level: Vec<u32> = sizes
                .iter()
                .map(|&size| {
                    shapes.push(ClusterShape {
                        depth,
                        capacity: size.max(1),
                        parent: None,
                    });
                    (shapes.len() - 1) as u32
                })
                .collect();

            if depth > 0 {
                let capacities: Vec<u32> = level.iter().map(|&i| shapes[i as usize].capacity).collect();
                let mut child_counts = vec![0u32; level.len()];
                let chooser = Chooser::new((0..level.len()).collect::<Vec<usize>>(), |&k| {
                    capacities[k] as f64
                });
                let mut overflow = 0usize;
                for &child in &previous {
                    let slot = if level.len() == 1 {
                        0
                    } else {
                        sample_parent(&chooser, &capacities, &child_counts, rng).unwrap_or_else(|| {
                            overflow += 1;
                            least_loaded(&capacities, &child_counts)
                        })
                    };
                    child_counts[slot] += 1;
                    shapes[child as usize].parent = Some(level[slot]);
                }
                if overflow > 0 {
                    warn!(
                        cluster_type = self.name.as_str(),
                        depth,
                        overflow,
                        "Parent clusters full, attached children to the least loaded"
                    );
                }
            }

            previous = level;
            if count == 1 {
                break;
            }
            min = self.nest_min;
            max = self.nest_max;
            average = self.nest_average.max(2.0);
            depth += 1;
        }
        ClusterFamily::assemble(type_index, city, shapes)
    }
}

/// Capacity-weighted draw of a parent slot, skipping full ones. `None`
/// when every draw hit a full parent.
fn sample_parent<R: RandomSource>(
    chooser: &Chooser<usize>,
    capacities: &[u32],
    child_counts: &[u32],
    rng: &mut R,
) -> Option<usize> {
    (0..PARENT_ATTEMPTS)
        .filter_map(|_| chooser.choose(rng).copied())
        .find(|&k| child_counts[k] <= capacities[k] + 1)
}

/// The parent slot with the lowest fill ratio.
fn least_loaded(capacities: &[u32], child_counts: &[u32]) -> usize {
    (0..capacities.len())
        .min_by(|&a, &b| {
            let load_a = child_counts[a] as f64 / capacities[a] as f64;
            let load_b = child_counts[b] as f64 / capacities[b] as f64;
            load_a.total_cmp(&load_b)
        })
        .unwrap_or(0)
}

/// The cluster types of a world, indexed by position.
///
/// Owned by the world and read-only once the world is built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterTypeRegistry {
    types: Vec<ClusterType>,
}

impl ClusterTypeRegistry {
    pub fn new(types: Vec<ClusterType>) -> Result<Self, BuildError> {
        if types.is_empty() {
            return Err(BuildError::NoClusterTypes);
        }
        if types.len() > MAX_CLUSTER_TYPES {
            return Err(BuildError::TooManyClusterTypes(types.len()));
        }
        Ok(Self { types })
    }

    /// The standard household, work and social types.
    pub fn builtin() -> Self {
        let types = ["household", "work", "social"]
            .iter()
            .filter_map(|name| ClusterType::builtin(name))
            .collect();
        Self { types }
    }

    /// Discovers types from `cluster.<name>.<field>` properties; with none
    /// defined, uses the built-in types. Properties (including
    /// `cluster.*.<field>` wildcards) override each type's defaults.
    pub fn from_config(cfg: &impl ConfigSource) -> Result<Self, BuildError> {
        let mut names: Vec<String> = Vec::new();
        for name in cfg.names() {
            let parts: Vec<&str> = name.split('.').collect();
            if parts.len() >= 3 && parts[0] == "cluster" && !names.iter().any(|n| n == parts[1]) {
                names.push(parts[1].to_string());
            }
        }
        if names.is_empty() {
            names = Self::builtin().types.into_iter().map(|t| t.name).collect();
        }
        let types = names
            .iter()
            .map(|name| {
                let base = ClusterType::builtin(name).unwrap_or_else(|| ClusterType::new(name));
                ClusterType::from_config(name, cfg, base)
            })
            .collect();
        Self::new(types)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&ClusterType> {
        self.types.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ClusterType> {
        self.types.iter()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.types.iter().position(|t| t.name == name)
    }

    /// Index of the location-defining type, or the first type.
    pub fn local_type(&self) -> usize {
        self.types.iter().position(ClusterType::is_local).unwrap_or(0)
    }

    /// Sum of every type's `exposure_weight`.
    pub fn exposure_weight(&self) -> f64 {
        self.types.iter().map(ClusterType::exposure_weight).sum()
    }

    pub(crate) fn finalize(&mut self, infection_prob: f64) {
        for ty in &mut self.types {
            ty.finalize(infection_prob);
        }
    }
}

// =============================================================================
// CLUSTERS
// =============================================================================

/// Address of a cluster anywhere in the world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClusterRef {
    /// Owning city
    pub city: u32,

    /// Cluster type, which is also the family index within the city
    pub family: u16,

    /// Position in the family arena
    pub index: u32,
}

impl ClusterRef {
    pub fn new(city: u32, family: u16, index: u32) -> Self {
        Self { city, family, index }
    }
}

#[derive(Debug, Clone, Copy)]
struct ClusterShape {
    depth: u16,
    capacity: u32,
    parent: Option<u32>,
}

/// A node of a cluster tree.
#[derive(Debug)]
pub struct Cluster {
    /// 0 for leaves, increasing towards the root
    depth: u16,

    /// Intended size: people for leaves, children otherwise
    capacity: u32,

    /// Structural parent, `None` for the root
    parent: Option<u32>,

    /// Structural children
    children: Vec<u32>,

    /// Person indices in the owning city (leaves only), set once at population build
    members: OnceLock<Box<[u32]>>,

    /// Redirected exposure parent in another city, set once at link time
    foreign_parent: OnceLock<ClusterRef>,

    /// Per-state counts of members
    counters: InfectionCounters,

    /// Deposits from the owning city
    local: DayExposure,

    /// Deposits from other cities
    foreign: ForeignExposure,

    /// Value handed to children today
    child_memo: DayExposure,

    /// Value a member adds to their risk today
    member_memo: DayExposure,
}

impl Cluster {
    fn from_shape(shape: ClusterShape) -> Self {
        Self {
            depth: shape.depth,
            capacity: shape.capacity,
            parent: shape.parent,
            children: Vec::new(),
            members: OnceLock::new(),
            foreign_parent: OnceLock::new(),
            counters: InfectionCounters::new(),
            local: DayExposure::new(),
            foreign: ForeignExposure::new(),
            child_memo: DayExposure::new(),
            member_memo: DayExposure::new(),
        }
    }

    pub fn depth(&self) -> u16 {
        self.depth
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn parent(&self) -> Option<u32> {
        self.parent
    }

    pub fn children(&self) -> &[u32] {
        &self.children
    }

    pub fn is_leaf(&self) -> bool {
        self.depth == 0
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// Member person indices; empty until the population is built.
    pub fn members(&self) -> &[u32] {
        self.members.get().map(|m| &m[..]).unwrap_or(&[])
    }

    pub(crate) fn set_members(&self, members: Vec<u32>) {
        let _ = self.members.set(members.into_boxed_slice());
    }

    pub fn counters(&self) -> &InfectionCounters {
        &self.counters
    }

    /// Where this cluster forwards its exposure, given its own address.
    pub fn exposure_parent(&self, me: ClusterRef) -> Option<ClusterRef> {
        self.foreign_parent
            .get()
            .copied()
            .or_else(|| self.parent.map(|p| ClusterRef::new(me.city, me.family, p)))
    }

    /// True when the exposure parent is not the structural parent.
    pub fn is_foreign_exposure(&self, me: ClusterRef) -> bool {
        self.exposure_parent(me) != self.parent.map(|p| ClusterRef::new(me.city, me.family, p))
    }

    /// Redirects a leaf's exposure. Inner clusters always forward to
    /// their structural parent.
    pub(crate) fn set_foreign_parent(&self, target: ClusterRef) -> bool {
        self.is_leaf() && self.foreign_parent.set(target).is_ok()
    }

    fn has_foreign_parent(&self) -> bool {
        self.foreign_parent.get().is_some()
    }

    /// Adds one contribution for `day`. `foreign` deposits come from an
    /// agent that does not own this cluster's city and take the lock.
    pub fn deposit(&self, day: Day, p: f32, foreign: bool) {
        if foreign {
            self.foreign.add(day, p);
        } else {
            self.local.add(day, p);
        }
    }

    /// Same-city and foreign exposure combined.
    pub fn exposure(&self, day: Day) -> f32 {
        combine(self.local.get(day), self.foreign.get(day))
    }

    /// Exposure deposited from other cities only.
    pub fn foreign_exposure(&self, day: Day) -> f32 {
        self.foreign.get(day)
    }

    /// The value every child gathers today. Computed on first request.
    pub fn child_exposure(&self, day: Day, nest_influence: f32) -> f32 {
        self.child_memo
            .memo(day, || scaled(self.exposure(day), nest_influence))
    }

    /// The risk a member adds for this cluster today. Computed on first request.
    pub fn member_exposure(&self, day: Day, influence: f32) -> f32 {
        self.member_memo.memo(day, || scaled(self.exposure(day), influence))
    }

    fn gather(&self, day: Day, from_parent: f32) {
        if from_parent > 0.0 {
            self.local.add(day, from_parent);
        }
    }
}

// =============================================================================
// FAMILIES
// =============================================================================

/// The cluster tree of one type in one city.
#[derive(Debug)]
pub struct ClusterFamily {
    /// Cluster type index
    type_index: usize,

    /// Owning city
    city: u32,

    /// Arena of every cluster
    clusters: Vec<Cluster>,

    /// Index of the root
    root: u32,

    /// Non-root clusters, children before parents
    up_order: Vec<u32>,

    /// Non-root clusters, parents before children
    down_order: Vec<u32>,

    /// Leaves, for population assignment and statistics
    leaf_index: Vec<u32>,

    /// Depth-1 clusters, candidate foreign exposure parents for other cities
    depth_one: Vec<u32>,

    /// Capacity-weighted leaf choice
    leaf_chooser: Chooser<u32>,
}

impl ClusterFamily {
    fn assemble(type_index: usize, city: u32, shapes: Vec<ClusterShape>) -> Self {
        let mut clusters: Vec<Cluster> = shapes.iter().copied().map(Cluster::from_shape).collect();
        let mut root = None;
        for (index, shape) in shapes.iter().enumerate() {
            match shape.parent {
                Some(parent) => {
                    debug_assert_eq!(clusters[parent as usize].depth, shape.depth + 1);
                    clusters[parent as usize].children.push(index as u32);
                }
                None => {
                    debug_assert!(root.is_none(), "cluster tree with two roots");
                    root = Some(index as u32);
                }
            }
        }
        let root = root.unwrap_or(0);

        let mut family = Self {
            type_index,
            city,
            clusters,
            root,
            up_order: Vec::new(),
            down_order: Vec::new(),
            leaf_index: Vec::new(),
            depth_one: Vec::new(),
            leaf_chooser: Chooser::new(Vec::new(), |_| 0.0),
        };
        family.up_order = family.postorder().into_iter().filter(|&i| i != root).collect();
        family.down_order = family.preorder().into_iter().filter(|&i| i != root).collect();
        family.leaf_index = family.leaves();
        family.depth_one = (0..family.clusters.len() as u32)
            .filter(|&i| family.clusters[i as usize].depth == 1)
            .collect();
        let capacities: Vec<u32> = family.clusters.iter().map(|c| c.capacity).collect();
        family.leaf_chooser = Chooser::new(family.leaf_index.clone(), |&i| capacities[i as usize] as f64);
        family
    }

    /// Root, then each subtree in order.
    pub fn preorder(&self) -> Vec<u32> {
        let mut order = Vec::with_capacity(self.clusters.len());
        let mut stack = vec![self.root];
        while let Some(index) = stack.pop() {
            order.push(index);
            stack.extend(self.clusters[index as usize].children.iter().rev());
        }
        order
    }

    /// Each subtree in order, then its root.
    pub fn postorder(&self) -> Vec<u32> {
        let mut order = Vec::with_capacity(self.clusters.len());
        let mut stack = vec![(self.root, false)];
        while let Some((index, expanded)) = stack.pop() {
            if expanded {
                order.push(index);
            } else {
                stack.push((index, true));
                for &child in self.clusters[index as usize].children.iter().rev() {
                    stack.push((child, false));
                }
            }
        }
        order
    }

    /// Leaves only, left to right.
    pub fn leaves(&self) -> Vec<u32> {
        self.preorder()
            .into_iter()
            .filter(|&i| self.clusters[i as usize].is_leaf())
            .collect()
    }

    pub fn type_index(&self) -> usize {
        self.type_index
    }

    pub fn city(&self) -> u32 {
        self.city
    }

    pub fn root(&self) -> u32 {
        self.root
    }

    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }

    pub fn cluster(&self, index: u32) -> Option<&Cluster> {
        self.clusters.get(index as usize)
    }

    pub fn clusters(&self) -> &[Cluster] {
        &self.clusters
    }

    /// Cached leaf indices.
    pub fn leaf_indices(&self) -> &[u32] {
        &self.leaf_index
    }

    /// Cached depth-1 indices.
    pub fn depth_one(&self) -> &[u32] {
        &self.depth_one
    }

    /// Depth of the root.
    pub fn height(&self) -> u16 {
        self.clusters
            .get(self.root as usize)
            .map(Cluster::depth)
            .unwrap_or(0)
    }

    /// Address of the cluster at `index`.
    pub fn address(&self, index: u32) -> ClusterRef {
        ClusterRef::new(self.city, self.type_index as u16, index)
    }

    /// Draws a leaf with probability proportional to its capacity.
    pub fn choose_leaf<R: RandomSource>(&self, rng: &mut R) -> u32 {
        self.leaf_chooser.choose(rng).copied().unwrap_or(self.root)
    }

    /// Sends each redirected leaf's exposure to its foreign parent.
    /// `resolve` looks up clusters in other cities.
    pub fn forward<'w>(
        &self,
        day: Day,
        nest_influence: f32,
        resolve: impl Fn(ClusterRef) -> Option<&'w Cluster>,
    ) {
        for &index in &self.leaf_index {
            let cluster = &self.clusters[index as usize];
            let Some(&target) = cluster.foreign_parent.get() else {
                continue;
            };
            let value = scaled(cluster.exposure(day), nest_influence);
            if value <= 0.0 {
                continue;
            }
            if let Some(remote) = resolve(target) {
                remote.deposit(day, value, true);
            }
        }
    }

    /// Forwards every non-root cluster's exposure to its structural parent,
    /// leaves first. Redirected leaves are skipped; they went out in
    /// [`ClusterFamily::forward`].
    pub fn bubble_up(&self, day: Day, nest_influence: f32) {
        for &index in &self.up_order {
            let cluster = &self.clusters[index as usize];
            if cluster.has_foreign_parent() {
                continue;
            }
            let Some(parent) = cluster.parent else {
                continue;
            };
            let value = scaled(cluster.exposure(day), nest_influence);
            if value > 0.0 {
                self.clusters[parent as usize].deposit(day, value, false);
            }
        }
    }

    /// Lets every non-root cluster gather its structural parent's child
    /// exposure, root first.
    pub fn trickle_down(&self, day: Day, nest_influence: f32) {
        for &index in &self.down_order {
            let cluster = &self.clusters[index as usize];
            if let Some(parent) = cluster.parent {
                let value = self.clusters[parent as usize].child_exposure(day, nest_influence);
                cluster.gather(day, value);
            }
        }
    }

    /// Counts leaves that are still fully susceptible and leaves with anyone
    /// left to infect.
    pub fn leaf_stats(&self) -> (u32, u32) {
        self.leaf_index
            .iter()
            .map(|&i| &self.clusters[i as usize].counters)
            .fold((0, 0), |(untouched, susceptible), c| {
                (
                    untouched + u32::from(c.population() > 0 && c.is_untouched()),
                    susceptible + u32::from(c.is_susceptible()),
                )
            })
    }
}
