//! Initial particle populations.
//!
//! A [`Population`] is a restartable producer: every call to
//! [`iter`](Population::iter) yields the same `count` records for the same
//! seed. Each record is produced by a spawner function from a
//! [`SpawnContext`] carrying its index and a per-particle RNG.

use std::f32::consts::{FRAC_PI_2, TAU};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use glam::{Vec2, Vec3, Vec4};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;

use crate::layout::{ParticleRecord, RECORD_SCALARS};

/// Radius of every star, in pixels.
pub const STAR_RADIUS: f32 = 3.0;

/// Radius of each cluster in [`Preset::CollidingGalaxies`], in pixels.
pub const GALAXY_RADIUS: f32 = 275.0;

/// Context handed to a spawner for one particle.
pub struct SpawnContext {
    /// Index of the particle being spawned (0 to count-1).
    pub index: u32,
    /// Total number of particles being spawned.
    pub count: u32,
    /// Width and height of the area being populated, in pixels.
    pub extent: Vec2,
    rng: SmallRng,
}

impl SpawnContext {
    pub(crate) fn new(index: u32, count: u32, extent: Vec2, seed: u64) -> Self {
        // Golden-ratio stride keeps neighbouring indices far apart in seed space.
        let particle_seed = seed ^ (index as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15);
        Self {
            index,
            count,
            extent,
            rng: SmallRng::seed_from_u64(particle_seed),
        }
    }

    /// Normalized progress through the population (0.0 to 1.0).
    #[inline]
    pub fn progress(&self) -> f32 {
        self.index as f32 / self.count as f32
    }

    /// Random f32 in `[0, 1)`.
    #[inline]
    pub fn random(&mut self) -> f32 {
        self.rng.gen()
    }

    /// Random f32 in `[min, max)`.
    #[inline]
    pub fn random_range(&mut self, min: f32, max: f32) -> f32 {
        self.rng.gen_range(min..max)
    }

    /// Random angle in `[0, 2π)`.
    #[inline]
    pub fn random_angle(&mut self) -> f32 {
        self.rng.gen_range(0.0..TAU)
    }
}

/// Stars scattered uniformly over the extent, with depth in `[0, height)`,
/// at rest and white.
pub fn random_space(ctx: &mut SpawnContext) -> ParticleRecord {
    let position = Vec3::new(
        ctx.random() * ctx.extent.x,
        ctx.random() * ctx.extent.y,
        ctx.random() * ctx.extent.y,
    );
    ParticleRecord::new(position, STAR_RADIUS, Vec3::ZERO, Vec4::ONE)
}

/// Two rotating star clusters just outside the left and right edges.
///
/// Even indices join the left cluster, odd indices the right. Each star
/// orbits its cluster's center with tangential speed `distance / 100`.
pub fn colliding_galaxies(ctx: &mut SpawnContext) -> ParticleRecord {
    let angle = ctx.random_angle();
    let angle2 = ctx.random_angle();
    let distance = ctx.random() * GALAXY_RADIUS;

    let x = if ctx.index % 2 == 0 {
        distance * angle.cos() - GALAXY_RADIUS
    } else {
        distance * angle.cos() + GALAXY_RADIUS + ctx.extent.x
    };
    let position = Vec3::new(
        x,
        distance * angle.sin() + ctx.extent.y / 2.0,
        distance * angle2.sin(),
    );
    let speed = distance / 100.0;
    let velocity = Vec3::new(
        (angle + FRAC_PI_2).cos() * speed,
        (angle + FRAC_PI_2).sin() * speed,
        (angle2 + FRAC_PI_2).sin() * speed,
    );
    ParticleRecord::new(position, STAR_RADIUS, velocity, Vec4::ONE)
}

/// Built-in initial states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Preset {
    #[default]
    RandomSpace,
    CollidingGalaxies,
}

impl Preset {
    pub fn spawner(self) -> fn(&mut SpawnContext) -> ParticleRecord {
        match self {
            Preset::RandomSpace => random_space,
            Preset::CollidingGalaxies => colliding_galaxies,
        }
    }
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Preset::RandomSpace => write!(f, "random-space"),
            Preset::CollidingGalaxies => write!(f, "colliding-galaxies"),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown preset `{0}`; expected `random-space` or `colliding-galaxies`")]
pub struct UnknownPreset(pub String);

impl FromStr for Preset {
    type Err = UnknownPreset;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "random-space" | "random" => Ok(Preset::RandomSpace),
            "colliding-galaxies" | "galaxies" => Ok(Preset::CollidingGalaxies),
            _ => Err(UnknownPreset(s.to_string())),
        }
    }
}

type Spawner = Arc<dyn Fn(&mut SpawnContext) -> ParticleRecord + Send + Sync>;

/// A deterministic, restartable producer of `count` particle records.
#[derive(Clone)]
pub struct Population {
    count: u32,
    extent: Vec2,
    seed: u64,
    spawner: Spawner,
}

impl Population {
    /// Population built by calling `spawner` once per particle.
    pub fn new<F>(count: u32, extent: Vec2, seed: u64, spawner: F) -> Self
    where
        F: Fn(&mut SpawnContext) -> ParticleRecord + Send + Sync + 'static,
    {
        Self {
            count,
            extent,
            seed,
            spawner: Arc::new(spawner),
        }
    }

    pub fn preset(preset: Preset, count: u32, extent: Vec2, seed: u64) -> Self {
        Self::new(count, extent, seed, preset.spawner())
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    /// Iterate the records from the first one. Each call starts over.
    pub fn iter(&self) -> PopulationIter<'_> {
        PopulationIter {
            population: self,
            next: 0,
        }
    }

    pub fn records(&self) -> Vec<ParticleRecord> {
        self.iter().collect()
    }

    /// The population as a flat scalar sequence of `count * 12` floats.
    pub fn scalars(&self) -> Vec<f32> {
        let mut out = Vec::with_capacity(self.count as usize * RECORD_SCALARS);
        for record in self.iter() {
            out.extend_from_slice(&record.to_scalars());
        }
        out
    }
}

impl fmt::Debug for Population {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Population")
            .field("count", &self.count)
            .field("extent", &self.extent)
            .field("seed", &self.seed)
            .finish_non_exhaustive()
    }
}

/// Iterator over a [`Population`].
pub struct PopulationIter<'a> {
    population: &'a Population,
    next: u32,
}

impl Iterator for PopulationIter<'_> {
    type Item = ParticleRecord;

    fn next(&mut self) -> Option<ParticleRecord> {
        if self.next >= self.population.count {
            return None;
        }
        let p = self.population;
        let mut ctx = SpawnContext::new(self.next, p.count, p.extent, p.seed);
        self.next += 1;
        Some((p.spawner)(&mut ctx))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.population.count - self.next) as usize;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for PopulationIter<'_> {}

impl<'a> IntoIterator for &'a Population {
    type Item = ParticleRecord;
    type IntoIter = PopulationIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
