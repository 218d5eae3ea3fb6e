use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of record a queued mutation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Location,
    Equipment,
    Part,
    Photo,
}

impl EntityType {
    pub const ALL: [EntityType; 4] = [
        EntityType::Location,
        EntityType::Equipment,
        EntityType::Part,
        EntityType::Photo,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Location => "location",
            EntityType::Equipment => "equipment",
            EntityType::Part => "part",
            EntityType::Photo => "photo",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "location" => Ok(EntityType::Location),
            "equipment" => Ok(EntityType::Equipment),
            "part" => Ok(EntityType::Part),
            "photo" => Ok(EntityType::Photo),
            _ => Err(format!(
                "Invalid entity type '{}'. Valid options: location, equipment, part, photo",
                s
            )),
        }
    }
}
