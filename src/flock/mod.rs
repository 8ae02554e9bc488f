use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;


/// Bird breed kept in a block. Drives the generator's starting climate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Breed {
    Broiler,
    Layer,
    Kuroiler,
    Local,
}

impl Breed {
    pub fn as_str(&self) -> &'static str {
        match self {
            Breed::Broiler => "broiler",
            Breed::Layer => "layer",
            Breed::Kuroiler => "kuroiler",
            Breed::Local => "local",
        }
    }

    /// Hardier breeds settle at a higher activity level.
    pub fn is_hardy(&self) -> bool {
        matches!(self, Breed::Kuroiler | Breed::Local)
    }
}

impl fmt::Display for Breed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Breed {
    type Err = FlockError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "broiler" => Ok(Breed::Broiler),
            "layer" => Ok(Breed::Layer),
            "kuroiler" => Ok(Breed::Kuroiler),
            "local" => Ok(Breed::Local),
            other => Err(FlockError::UnknownBreed(other.to_string())),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgeGroup {
    Chick,
    Grower,
    Adult,
}

impl AgeGroup {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgeGroup::Chick => "chick",
            AgeGroup::Grower => "grower",
            AgeGroup::Adult => "adult",
        }
    }
}

impl fmt::Display for AgeGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgeGroup {
    type Err = FlockError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "chick" => Ok(AgeGroup::Chick),
            "grower" => Ok(AgeGroup::Grower),
            "adult" => Ok(AgeGroup::Adult),
            other => Err(FlockError::UnknownAgeGroup(other.to_string())),
        }
    }
}

/// A monitored flock block: a named group of birds owned by one user.
///
/// A running simulation works from the copy it was started with; later edits
/// only take effect after a restart.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FlockBlock {
    pub id: i64,
    pub owner_id: i64,
    pub name: String,
    pub number_of_birds: u32,
    pub breed: Breed,
    pub age_group: AgeGroup,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a block
#[derive(Clone, Debug, Deserialize)]
pub struct NewFlockBlock {
    pub owner_id: i64,
    pub name: String,
    #[serde(default = "default_number_of_birds")]
    pub number_of_birds: u32,
    pub breed: Breed,
    pub age_group: AgeGroup,
    #[serde(default)]
    pub description: Option<String>,
}

fn default_number_of_birds() -> u32 {
    10
}

/// Partial update body. Only fields present are changed.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct FlockBlockUpdate {
    pub name: Option<String>,
    pub number_of_birds: Option<u32>,
    pub breed: Option<Breed>,
    pub age_group: Option<AgeGroup>,
    pub description: Option<String>,
}

impl FlockBlockUpdate {
    /// Applies the update in place, bumping `updated_at`.
    pub fn apply(&self, block: &mut FlockBlock) {
        if let Some(name) = &self.name {
            block.name = name.trim().to_string();
        }
        if let Some(n) = self.number_of_birds {
            block.number_of_birds = n;
        }
        if let Some(breed) = self.breed {
            block.breed = breed;
        }
        if let Some(age_group) = self.age_group {
            block.age_group = age_group;
        }
        if let Some(description) = &self.description {
            block.description = Some(description.clone());
        }
        block.updated_at = Utc::now();
    }
}

/// Validation errors for block input
#[derive(Debug, Clone, PartialEq)]
pub enum FlockError {
    EmptyName,
    NameTooLong(usize),
    UnknownBreed(String),
    UnknownAgeGroup(String),
}

impl fmt::Display for FlockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlockError::EmptyName => write!(f, "Block name must not be empty"),
            FlockError::NameTooLong(len) => write!(
                f,
                "Block name is {} characters, maximum is {}",
                len, MAX_NAME_LEN
            ),
            FlockError::UnknownBreed(b) => write!(f, "Unknown breed '{}'", b),
            FlockError::UnknownAgeGroup(a) => write!(f, "Unknown age group '{}'", a),
        }
    }
}

impl std::error::Error for FlockError {}

pub const MAX_NAME_LEN: usize = 100;

/// Checks a block name: non-empty after trimming, at most 100 characters.
pub fn validate_name(name: &str) -> Result<(), FlockError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(FlockError::EmptyName);
    }
    let len = trimmed.chars().count();
    if len > MAX_NAME_LEN {
        return Err(FlockError::NameTooLong(len));
    }
    Ok(())
}
