//! Correlated synthetic sensor generator.
//!
//! One generator per running block. State is kept at full precision and
//! only the emitted values are rounded, so long runs do not drift from
//! repeated rounding.

use crate::flock::{AgeGroup, Breed, FlockBlock};
use crate::sensor::SensorValues;
use rand::Rng;

pub const TEMPERATURE_RANGE: (f64, f64) = (24.0, 40.0);
pub const HUMIDITY_RANGE: (f64, f64) = (45.0, 90.0);
pub const AMMONIA_RANGE: (f64, f64) = (0.0, 100.0);
pub const ACTIVITY_RANGE: (f64, f64) = (5.0, 100.0);

const HUMIDITY_STEP: f64 = 0.4;
/// Temperature above which birds become less active
const HEAT_STRESS_TEMPERATURE: f64 = 34.0;

/// Mutable generator state. Never shared between runners.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GeneratorState {
    pub values: SensorValues,
}

impl GeneratorState {
    /// Breed-specific starting point for a fresh run.
    pub fn initialize(breed: Breed) -> Self {
        let (temperature, humidity) = match breed {
            Breed::Broiler => (32.0, 65.0),
            Breed::Layer => (28.0, 60.0),
            Breed::Kuroiler => (30.0, 68.0),
            Breed::Local => (29.0, 70.0),
        };
        Self {
            values: SensorValues {
                temperature,
                humidity,
                ammonia: 10.0,
                feed_level: 100.0,
                water_level: 100.0,
                activity_level: 80.0,
            },
        }
    }
}

/// Static block attributes the generator reads each step.
///
/// Captured at construction; edits to the block do not reach a running
/// generator.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FlockProfile {
    pub number_of_birds: u32,
    pub breed: Breed,
    pub age_group: AgeGroup,
}

impl From<&FlockBlock> for FlockProfile {
    fn from(block: &FlockBlock) -> Self {
        Self {
            number_of_birds: block.number_of_birds,
            breed: block.breed,
            age_group: block.age_group,
        }
    }
}

impl FlockProfile {
    /// More birds empty the feeders and drinkers faster.
    pub fn consumption_factor(&self) -> f64 {
        1.0 + self.number_of_birds as f64 / 50.0
    }

    pub fn temperature_step(&self) -> f64 {
        0.15 + if self.age_group == AgeGroup::Adult {
            0.05
        } else {
            0.02
        }
    }

    pub fn baseline_activity(&self) -> f64 {
        60.0 + if self.breed.is_hardy() { 10.0 } else { 0.0 }
    }
}

pub struct ReadingGenerator {
    profile: FlockProfile,
    state: GeneratorState,
}

impl ReadingGenerator {
    pub fn new(block: &FlockBlock) -> Self {
        Self::with_profile(FlockProfile::from(block))
    }

    pub fn with_profile(profile: FlockProfile) -> Self {
        Self {
            profile,
            state: GeneratorState::initialize(profile.breed),
        }
    }

    pub fn state(&self) -> &GeneratorState {
        &self.state
    }

    pub fn profile(&self) -> &FlockProfile {
        &self.profile
    }

    /// Advances the state one step and returns the rounded sample.
    pub fn step<R: Rng + ?Sized>(&mut self, rng: &mut R) -> SensorValues {
        let profile = self.profile;
        let v = &mut self.state.values;
        let consumption = profile.consumption_factor();

        v.temperature = fluctuate(
            rng,
            v.temperature,
            TEMPERATURE_RANGE,
            profile.temperature_step(),
        );
        v.humidity = fluctuate(rng, v.humidity, HUMIDITY_RANGE, HUMIDITY_STEP);

        // Consumption uses the activity level from before this step
        let activity_share = 0.02 * (v.activity_level / 100.0);
        let feed_decrease = (0.05 + activity_share) * consumption;
        let water_decrease = (0.06 + activity_share) * consumption;
        v.feed_level = (v.feed_level - feed_decrease * rng.gen_range(0.5..=1.5)).max(0.0);
        v.water_level = (v.water_level - water_decrease * rng.gen_range(0.5..=1.5)).max(0.0);

        let ammonia_delta = (100.0 - v.feed_level) / 500.0
            + (v.humidity - 60.0) / 200.0
            + rng.gen_range(-0.2..=0.6);
        v.ammonia = clamp(v.ammonia + ammonia_delta, AMMONIA_RANGE);

        let heat_penalty = if v.temperature > HEAT_STRESS_TEMPERATURE {
            (v.temperature - HEAT_STRESS_TEMPERATURE) * 2.5
        } else {
            0.0
        };
        let pull = (profile.baseline_activity() - v.activity_level) * 0.02;
        v.activity_level = clamp(
            v.activity_level + rng.gen_range(-4.0..=4.0) + pull - heat_penalty * 0.2,
            ACTIVITY_RANGE,
        );

        v.rounded()
    }
}

/// Bounded random walk: one uniform step of at most `step`, then clamp.
pub fn fluctuate<R: Rng + ?Sized>(rng: &mut R, value: f64, range: (f64, f64), step: f64) -> f64 {
    clamp(value + rng.gen_range(-step..=step), range)
}

fn clamp(value: f64, (min, max): (f64, f64)) -> f64 {
    value.max(min).min(max)
}
